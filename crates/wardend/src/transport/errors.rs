//! Errors raised while binding the helper's socket.

use std::io;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failure to bring the listener up.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("{host}:{port} resolved to no addresses")]
    ResolveEmpty { host: String, port: u16 },
    #[error("cannot listen on {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("cannot read the listener's bound address: {source}")]
    LocalAddress {
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("unix socket {endpoint} is not supported on this platform")]
    UnsupportedUnix { endpoint: String },
    #[cfg(unix)]
    #[error("cannot listen on unix socket {path}: {source}")]
    BindUnix {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another helper answers on the socket.
    #[cfg(unix)]
    #[error("unix socket {path} is served by a running helper")]
    UnixInUse { path: Utf8PathBuf },
    #[cfg(unix)]
    #[error("{path} exists and is not a socket")]
    UnixNotSocket { path: Utf8PathBuf },
    #[cfg(unix)]
    #[error("cannot inspect {path}: {source}")]
    UnixMetadata {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("cannot probe existing socket {path}: {source}")]
    UnixConnect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("cannot remove stale socket {path}: {source}")]
    UnixCleanup {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
