//! Socket transport to the helper.
//!
//! A [`SocketConnector`] dials the configured endpoint and caches the open
//! [`SocketChannel`]. Each channel multiplexes requests over one connection:
//! writes are serialised behind a mutex, and a reader task routes replies to
//! the waiting caller by frame id.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use warden_config::SocketEndpoint;
use warden_protocol::frame::{decode_line, encode_line};
use warden_protocol::{
    Channel, ChannelError, Connector, FrameError, MAX_FRAME_BYTES, ReplyOutcome, RequestFrame,
    ServerFrame, ServerNotice,
};

use crate::TRANSPORT_TARGET;

/// Upper bound on establishing a connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Reply = Result<ReplyOutcome, ChannelError>;

#[derive(Default)]
struct PendingState {
    replies: HashMap<u64, oneshot::Sender<Reply>>,
    closed: Option<ChannelError>,
}

impl PendingState {
    fn fail_all(&mut self, error: &ChannelError) {
        self.closed.get_or_insert_with(|| error.clone());
        for (_, sender) in self.replies.drain() {
            // The caller may have given up already.
            drop(sender.send(Err(error.clone())));
        }
    }
}

/// Removes a pending entry when the waiting caller goes away.
struct PendingGuard {
    pending: Arc<Mutex<PendingState>>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().replies.remove(&self.id);
    }
}

/// One open connection to the helper.
pub struct SocketChannel {
    endpoint: String,
    writer: AsyncMutex<Writer>,
    pending: Arc<Mutex<PendingState>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl SocketChannel {
    fn spawn<S>(endpoint: String, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(Mutex::new(PendingState::default()));
        let reader = tokio::spawn(read_replies(
            endpoint.clone(),
            BufReader::new(read_half),
            Arc::clone(&pending),
        ));
        Self {
            endpoint,
            writer: AsyncMutex::new(Box::new(write_half)),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    /// Returns `true` once the connection can no longer carry requests.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed.is_some() || self.reader.is_finished()
    }

    async fn write_frame(&self, id: u64, command: &str, envelope: Vec<u8>) -> Result<(), ChannelError> {
        let line = encode_line(&RequestFrame {
            id,
            command: command.to_owned(),
            envelope,
        })?;
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|error| {
            let failure = ChannelError::from_io(self.endpoint.clone(), error);
            self.pending.lock().fail_all(&failure);
            failure
        })
    }

    fn closed_error(&self) -> Option<ChannelError> {
        self.pending.lock().closed.clone()
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Channel for SocketChannel {
    async fn request(&self, command: &str, envelope: Vec<u8>) -> Result<ReplyOutcome, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.pending.lock();
            if let Some(error) = &state.closed {
                return Err(error.clone());
            }
            state.replies.insert(id, sender);
        }
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        self.write_frame(id, command, envelope).await?;
        debug!(target: TRANSPORT_TARGET, id, command, "request sent");
        receiver.await.unwrap_or(Err(ChannelError::Interrupted))
    }

    async fn notify(&self, command: &str, envelope: Vec<u8>) -> Result<(), ChannelError> {
        if let Some(error) = self.closed_error() {
            return Err(error);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_frame(id, command, envelope).await
    }
}

async fn read_replies<R>(endpoint: String, mut reader: BufReader<R>, pending: Arc<Mutex<PendingState>>)
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(MAX_FRAME_BYTES + 1).unwrap_or(u64::MAX);
    loop {
        let mut line = Vec::new();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut line).await;
        let failure = match read {
            Ok(0) => ChannelError::Interrupted,
            Ok(_) if line.last() != Some(&b'\n') && line.len() > MAX_FRAME_BYTES => {
                ChannelError::Frame(FrameError::TooLarge { size: line.len() })
            }
            Ok(_) => match decode_line::<ServerFrame>(&line) {
                Ok(ServerFrame::Reply(frame)) => {
                    let sender = pending.lock().replies.remove(&frame.id);
                    match sender {
                        Some(sender) => drop(sender.send(Ok(frame.outcome))),
                        None => debug!(
                            target: TRANSPORT_TARGET,
                            id = frame.id,
                            "discarding reply nobody is waiting for"
                        ),
                    }
                    continue;
                }
                Ok(ServerFrame::Notice {
                    notice: ServerNotice::TerminationImminent,
                }) => {
                    debug!(target: TRANSPORT_TARGET, %endpoint, "helper announced termination");
                    ChannelError::TerminationImminent
                }
                Err(error) => {
                    warn!(target: TRANSPORT_TARGET, %endpoint, %error, "malformed frame from helper");
                    ChannelError::Frame(error)
                }
            },
            Err(error) => ChannelError::Io(Arc::new(error)),
        };
        pending.lock().fail_all(&failure);
        break;
    }
}

/// Dials the helper's socket and caches the resulting channel.
pub struct SocketConnector {
    endpoint: SocketEndpoint,
    cached: Mutex<Option<Arc<SocketChannel>>>,
}

impl SocketConnector {
    /// Connector for `endpoint`.
    #[must_use]
    pub const fn new(endpoint: SocketEndpoint) -> Self {
        Self {
            endpoint,
            cached: Mutex::new(None),
        }
    }

    /// Endpoint this connector dials.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<SocketChannel, ChannelError> {
        let display = self.endpoint.to_string();
        let connecting = async {
            match &self.endpoint {
                SocketEndpoint::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    stream.set_nodelay(true)?;
                    Ok(SocketChannel::spawn(display.clone(), stream))
                }
                #[cfg(unix)]
                SocketEndpoint::Unix { path } => {
                    let stream = UnixStream::connect(path.as_std_path()).await?;
                    Ok(SocketChannel::spawn(display.clone(), stream))
                }
                #[cfg(not(unix))]
                SocketEndpoint::Unix { .. } => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are unavailable on this platform",
                )),
            }
        };
        match tokio::time::timeout(CONNECTION_TIMEOUT, connecting).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(error)) => Err(ChannelError::from_io(display, error)),
            Err(_) => Err(ChannelError::invalid(
                display,
                io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"),
            )),
        }
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn connect(&self) -> Result<Arc<dyn Channel>, ChannelError> {
        let cached = self
            .cached
            .lock()
            .as_ref()
            .filter(|channel| !channel.is_closed())
            .cloned();
        if let Some(channel) = cached {
            return Ok(channel);
        }
        let channel = Arc::new(self.dial().await?);
        debug!(target: TRANSPORT_TARGET, endpoint = %self.endpoint, "connected to helper");
        *self.cached.lock() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn invalidate(&self) {
        self.cached.lock().take();
    }
}
