//! Socket transport for the helper.
//!
//! [`SocketListener`] binds the descriptor's endpoint and spawns one task per
//! accepted connection. Each connection reads JSONL request frames, hands
//! every frame to the [`crate::HelperService`] on its own task and writes
//! replies through a single writer task.

mod connection;
mod errors;
mod listener;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::warn;

use warden_protocol::PeerIdentity;

use crate::TRANSPORT_TARGET;

pub use errors::ListenerError;
pub use listener::{DRAIN_TIMEOUT, SocketListener};

/// Streams accepted by the listener.
enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Credentials of the connecting process; TCP peers carry none.
    fn peer_identity(&self) -> PeerIdentity {
        match self {
            Self::Tcp(_) => PeerIdentity::unknown(),
            #[cfg(unix)]
            Self::Unix(stream) => match stream.peer_cred() {
                Ok(credentials) => resolve_executable(PeerIdentity::from_credentials(
                    credentials.pid(),
                    credentials.uid(),
                    credentials.gid(),
                )),
                Err(error) => {
                    warn!(target: TRANSPORT_TARGET, %error, "peer credentials unavailable");
                    PeerIdentity::unknown()
                }
            },
        }
    }
}

#[cfg(target_os = "linux")]
fn resolve_executable(identity: PeerIdentity) -> PeerIdentity {
    let Some(pid) = identity.pid() else {
        return identity;
    };
    match std::fs::read_link(format!("/proc/{pid}/exe")) {
        Ok(path) => identity.with_executable(path),
        Err(_) => identity,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
const fn resolve_executable(identity: PeerIdentity) -> PeerIdentity {
    identity
}

/// Completes once the service asks to stop, or the service is gone.
async fn stopped(mut signal: watch::Receiver<bool>) {
    loop {
        let stop = *signal.borrow_and_update();
        if stop || signal.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests;
