//! Where the helper listens.
//!
//! The helper only ever serves local callers: Unix sockets are the norm, and
//! TCP endpoints are restricted to loopback hosts.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

/// Address of the helper's listening socket.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Unix domain socket at `path`.
    Unix {
        /// Socket file.
        path: Utf8PathBuf,
    },
    /// Loopback TCP socket.
    Tcp {
        /// Loopback address or `localhost`, without brackets.
        host: String,
        /// `0` lets the listener pick a port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Unix socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// TCP endpoint. The host is not checked; see [`Self::is_loopback`].
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_path()),
            Self::Tcp { .. } => None,
        }
    }

    /// Returns `true` for Unix sockets and for TCP on a loopback host.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        match self {
            Self::Unix { .. } => true,
            Self::Tcp { host, .. } => is_loopback_host(host),
        }
    }

    /// Readies the endpoint for binding.
    ///
    /// Unix sockets get their parent directory created with mode `0700`. TCP
    /// endpoints must name a loopback host.
    ///
    /// # Errors
    ///
    /// Fails for relative socket paths, non-loopback hosts, or when the
    /// directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        match self {
            Self::Tcp { host, .. } if !is_loopback_host(host) => {
                Err(SocketPreparationError::NotLoopback { host: host.clone() })
            }
            Self::Tcp { .. } => Ok(()),
            Self::Unix { path } => create_socket_directory(path),
        }
    }
}

fn create_socket_directory(path: &Utf8Path) -> Result<(), SocketPreparationError> {
    let parent = match path.parent() {
        Some(parent) if path.is_absolute() && !parent.as_str().is_empty() => parent,
        _ => {
            return Err(SocketPreparationError::RelativePath {
                path: path.to_path_buf(),
            });
        }
    };
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    match builder.create(parent.as_std_path()) {
        Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
            Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|address| address.is_loopback())
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" if url.path().is_empty() => Err(SocketParseError::Incomplete {
                input: input.to_owned(),
                missing: "socket path",
            }),
            "unix" => Ok(Self::unix(url.path())),
            "tcp" => {
                let host = match url.host() {
                    Some(Host::Ipv4(address)) => IpAddr::V4(address).to_string(),
                    Some(Host::Ipv6(address)) => IpAddr::V6(address).to_string(),
                    Some(Host::Domain(name)) => name.to_owned(),
                    None => {
                        return Err(SocketParseError::Incomplete {
                            input: input.to_owned(),
                            missing: "host",
                        });
                    }
                };
                let Some(port) = url.port() else {
                    return Err(SocketParseError::Incomplete {
                        input: input.to_owned(),
                        missing: "port",
                    });
                };
                if !is_loopback_host(&host) {
                    return Err(SocketParseError::NotLoopback { host });
                }
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Loopback TCP endpoint on the IPv4 loopback address.
#[must_use]
pub fn loopback(port: u16) -> SocketEndpoint {
    SocketEndpoint::tcp(Ipv4Addr::LOCALHOST.to_string(), port)
}

/// Errors raised while parsing a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Only `unix` and `tcp` are understood.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("'{input}' has no {missing}")]
    Incomplete {
        /// Text that was parsed.
        input: String,
        /// Component that is absent.
        missing: &'static str,
    },
    /// The helper refuses to listen beyond the local host.
    #[error("TCP host '{host}' is not a loopback address")]
    NotLoopback {
        /// Rejected host.
        host: String,
    },
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised by [`SocketEndpoint::prepare_filesystem`].
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    #[error("socket path '{path}' must be absolute")]
    RelativePath {
        /// Offending socket path.
        path: Utf8PathBuf,
    },
    #[error("TCP host '{host}' is not a loopback address")]
    NotLoopback {
        /// Rejected host.
        host: String,
    },
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn loopback_v6(port: u16) -> SocketEndpoint {
        SocketEndpoint::tcp(std::net::Ipv6Addr::LOCALHOST.to_string(), port)
    }

    #[rstest]
    #[case("tcp://127.0.0.1:9000", loopback(9000))]
    #[case("tcp://[::1]:9000", loopback_v6(9000))]
    #[case("tcp://localhost:9000", SocketEndpoint::tcp("localhost", 9000))]
    #[case("unix:///tmp/w.sock", SocketEndpoint::unix("/tmp/w.sock"))]
    fn parses_local_endpoints(#[case] input: &str, #[case] expected: SocketEndpoint) {
        let endpoint: SocketEndpoint = input.parse().expect("endpoint parses");

        assert_eq!(endpoint, expected);
        assert_eq!(endpoint.to_string().parse::<SocketEndpoint>().ok(), Some(expected));
    }

    #[rstest]
    #[case("tcp://127.0.0.1", "port")]
    #[case("unix://", "socket path")]
    fn incomplete_endpoints_name_what_is_missing(#[case] input: &str, #[case] component: &str) {
        let error = input.parse::<SocketEndpoint>().expect_err("incomplete");

        assert!(
            matches!(error, SocketParseError::Incomplete { missing, .. } if missing == component),
            "{error}"
        );
    }

    #[rstest]
    #[case("tcp://10.0.0.7:4100")]
    #[case("tcp://helper.example.com:4100")]
    fn remote_hosts_are_refused(#[case] input: &str) {
        assert!(matches!(
            input.parse::<SocketEndpoint>(),
            Err(SocketParseError::NotLoopback { .. })
        ));
    }

    #[test]
    fn other_schemes_are_refused() {
        assert!(matches!(
            "http://localhost:80".parse::<SocketEndpoint>(),
            Err(SocketParseError::UnsupportedScheme(scheme)) if scheme == "http"
        ));
    }

    #[rstest]
    #[case(loopback(1), true)]
    #[case(SocketEndpoint::tcp("LOCALHOST", 1), true)]
    #[case(SocketEndpoint::tcp("203.0.113.9", 1), false)]
    #[case(SocketEndpoint::unix("/run/h.sock"), true)]
    fn loopback_detection(#[case] endpoint: SocketEndpoint, #[case] expected: bool) {
        assert_eq!(endpoint.is_loopback(), expected);
    }

    #[test]
    fn ipv6_hosts_are_bracketed_when_displayed() {
        assert_eq!(loopback_v6(7).to_string(), "tcp://[::1]:7");
    }

    #[test]
    fn prepare_creates_a_private_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
        let endpoint = SocketEndpoint::unix(root.join("nested/helper.sock"));

        endpoint.prepare_filesystem().expect("directory prepared");

        assert!(root.join("nested").is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(root.join("nested"))
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[rstest]
    #[case(SocketEndpoint::unix("helper.sock"))]
    #[case(SocketEndpoint::tcp("192.168.1.4", 4100))]
    fn prepare_refuses_unsafe_endpoints(#[case] endpoint: SocketEndpoint) {
        assert!(endpoint.prepare_filesystem().is_err());
    }
}
