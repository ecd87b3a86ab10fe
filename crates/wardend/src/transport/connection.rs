//! A single client connection.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use warden_protocol::frame::{decode_line, encode_line};
use warden_protocol::{
    MAX_FRAME_BYTES, PeerIdentity, RemoteError, ReplyFrame, ReplyOutcome, RequestFrame,
    ServerFrame, ServerNotice,
};

use super::{ConnectionStream, stopped};
use crate::{HelperService, TRANSPORT_TARGET};

pub(super) async fn serve(stream: ConnectionStream, service: Arc<HelperService>) {
    let peer = stream.peer_identity();
    if !service.admits(&peer).await {
        warn!(
            target: TRANSPORT_TARGET,
            %peer,
            "closing connection: client does not satisfy the helper's requirement"
        );
        return;
    }
    debug!(target: TRANSPORT_TARGET, %peer, "connection admitted");
    match stream {
        ConnectionStream::Tcp(stream) => run(stream, peer, service).await,
        #[cfg(unix)]
        ConnectionStream::Unix(stream) => run(stream, peer, service).await,
    }
}

enum Line {
    Frame(Vec<u8>),
    TooLarge(usize),
    Closed,
}

async fn read_line<R>(reader: &mut BufReader<R>) -> io::Result<Line>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(MAX_FRAME_BYTES + 1).unwrap_or(u64::MAX);
    let mut line = Vec::new();
    let read = reader.take(limit).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(Line::Closed);
    }
    if line.last() != Some(&b'\n') && line.len() > MAX_FRAME_BYTES {
        return Ok(Line::TooLarge(line.len()));
    }
    Ok(Line::Frame(line))
}

/// Recovers the id of a request that failed to decode.
fn salvage_id(line: &[u8]) -> Option<u64> {
    serde_json::from_slice::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

async fn run<S>(stream: S, peer: PeerIdentity, service: Arc<HelperService>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (replies, outbox) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(write_half, outbox, service.shutdown_requested()));
    let peer = Arc::new(peer);
    let mut reader = BufReader::new(read_half);
    let requested = stopped(service.shutdown_requested());
    tokio::pin!(requested);

    loop {
        let line = tokio::select! {
            () = &mut requested => break,
            line = read_line(&mut reader) => line,
        };
        let bytes = match line {
            Ok(Line::Frame(bytes)) => bytes,
            Ok(Line::Closed) => {
                debug!(target: TRANSPORT_TARGET, %peer, "client closed the connection");
                break;
            }
            Ok(Line::TooLarge(size)) => {
                warn!(target: TRANSPORT_TARGET, %peer, size, "dropping connection: frame too large");
                break;
            }
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, %peer, %error, "connection read failed");
                break;
            }
        };
        if bytes.trim_ascii().is_empty() {
            continue;
        }

        match decode_line::<RequestFrame>(&bytes) {
            Ok(frame) => {
                let service = Arc::clone(&service);
                let peer = Arc::clone(&peer);
                let replies = replies.clone();
                tokio::spawn(async move {
                    let dispatched = service.handle_frame(frame, &peer).await;
                    if let Some(reply) = dispatched.reply
                        && replies.send(reply).is_err()
                    {
                        debug!(target: TRANSPORT_TARGET, "connection closed before the reply");
                    }
                    if dispatched.shutdown {
                        info!(target: TRANSPORT_TARGET, "helper uninstalled; shutting down");
                        service.request_shutdown();
                    }
                });
            }
            Err(error) => match salvage_id(&bytes) {
                Some(id) => {
                    let reply = ReplyFrame {
                        id,
                        outcome: ReplyOutcome::Error {
                            error: RemoteError::MalformedFrame {
                                message: error.to_string(),
                            },
                        },
                    };
                    if replies.send(reply).is_err() {
                        break;
                    }
                }
                None => warn!(target: TRANSPORT_TARGET, %peer, %error, "ignoring malformed frame"),
            },
        }
    }

    drop(replies);
    if let Err(error) = writer.await {
        warn!(target: TRANSPORT_TARGET, %error, "connection writer failed");
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut outbox: mpsc::UnboundedReceiver<ReplyFrame>,
    shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let requested = stopped(shutdown.clone());
    tokio::pin!(requested);
    loop {
        let frame = tokio::select! {
            biased;
            reply = outbox.recv() => match reply {
                Some(reply) => ServerFrame::Reply(reply),
                None => break,
            },
            () = &mut requested => break,
        };
        if write_frame(&mut writer, &frame).await.is_err() {
            return;
        }
    }

    while let Ok(reply) = outbox.try_recv() {
        if write_frame(&mut writer, &ServerFrame::Reply(reply)).await.is_err() {
            return;
        }
    }
    let terminating = *shutdown.borrow();
    if terminating {
        let notice = ServerFrame::Notice {
            notice: ServerNotice::TerminationImminent,
        };
        if write_frame(&mut writer, &notice).await.is_ok() {
            debug!(target: TRANSPORT_TARGET, "termination notice sent");
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &ServerFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(frame).map_err(io::Error::other)?;
    let written = async {
        writer.write_all(&line).await?;
        writer.flush().await
    }
    .await;
    if let Err(error) = &written {
        debug!(target: TRANSPORT_TARGET, %error, "reply write failed");
    }
    written
}
