//! Accept loop for the helper socket.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use warden_config::SocketEndpoint;

use super::{ConnectionStream, ListenerError, connection, stopped};
use crate::{HelperService, TRANSPORT_TARGET};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Longest wait for open connections to finish after shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Listener bound to the helper's endpoint.
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

impl SocketListener {
    /// Binds `endpoint`.
    ///
    /// A leftover Unix socket nobody answers on is removed first. TCP port
    /// `0` picks a free port; see [`Self::local_endpoint`].
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be resolved or bound, or when another
    /// process still serves the Unix socket.
    pub async fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port).await?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => ListenerKind::Unix(bind_unix(path)?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    /// Endpoint clients should dial, with any ephemeral port resolved.
    ///
    /// # Errors
    ///
    /// Fails when the OS cannot report the bound TCP address.
    pub fn local_endpoint(&self) -> Result<SocketEndpoint, ListenerError> {
        match &self.listener {
            ListenerKind::Tcp(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|source| ListenerError::LocalAddress { source })?;
                Ok(SocketEndpoint::tcp(addr.ip().to_string(), addr.port()))
            }
            #[cfg(unix)]
            ListenerKind::Unix(_) => Ok(self.endpoint.clone()),
        }
    }

    /// Serves connections until `stop` completes or the service asks to stop.
    ///
    /// Every connection is told that the helper is terminating, then given
    /// [`DRAIN_TIMEOUT`] to finish before being aborted. A Unix socket file
    /// is removed on the way out.
    pub async fn serve<F>(self, service: Arc<HelperService>, stop: F)
    where
        F: Future<Output = ()>,
    {
        info!(target: TRANSPORT_TARGET, endpoint = %self.endpoint, "socket listener active");
        let requested = stopped(service.shutdown_requested());
        tokio::pin!(stop, requested);
        let mut connections = JoinSet::new();
        let mut last_error = None::<io::ErrorKind>;

        loop {
            tokio::select! {
                () = &mut stop => {
                    info!(target: TRANSPORT_TARGET, "stop signal received");
                    break;
                }
                () = &mut requested => {
                    info!(target: TRANSPORT_TARGET, "service requested shutdown");
                    break;
                }
                accepted = self.accept() => match accepted {
                    Ok(stream) => {
                        last_error = None;
                        connections.spawn(connection::serve(stream, Arc::clone(&service)));
                    }
                    Err(error) => {
                        if last_error != Some(error.kind()) {
                            warn!(target: TRANSPORT_TARGET, %error, "socket accept error");
                        }
                        last_error = Some(error.kind());
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(error) = finished {
                        warn!(target: TRANSPORT_TARGET, %error, "connection task failed");
                    }
                }
            }
        }

        service.request_shutdown();
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                target: TRANSPORT_TARGET,
                remaining = connections.len(),
                "aborting connections that outlived shutdown"
            );
            connections.abort_all();
        }

        #[cfg(unix)]
        if let Some(path) = self.endpoint.unix_path() {
            remove_socket_file(path);
        }
        debug!(target: TRANSPORT_TARGET, "socket listener stopped");
    }

    async fn accept(&self) -> io::Result<ConnectionStream> {
        match &self.listener {
            ListenerKind::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::Tcp(stream))
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(ConnectionStream::Unix(stream))
            }
        }
    }
}

async fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Utf8Path) -> Result<UnixListener, ListenerError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(ListenerError::UnixNotSocket {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => match std::os::unix::net::UnixStream::connect(path) {
            Ok(_live) => {
                return Err(ListenerError::UnixInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                debug!(target: TRANSPORT_TARGET, %path, "removing stale socket");
                std::fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixConnect {
                    path: path.to_path_buf(),
                    source,
                });
            }
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ListenerError::UnixMetadata {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn remove_socket_file(path: &Utf8Path) {
    if let Err(error) = std::fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(target: TRANSPORT_TARGET, %error, %path, "failed to remove unix socket file");
    }
}
