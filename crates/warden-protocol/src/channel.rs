//! Channel transport interface.
//!
//! A [`Connector`] yields a [`Channel`] to the helper. A channel carries one
//! request per call and returns the matching reply outcome; correlation is
//! the channel's concern.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::frame::{FrameError, ReplyOutcome};

/// Errors raised by a channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The helper is not reachable: nothing listens, or the peer is gone.
    #[error("helper at {endpoint} is unreachable: {source}")]
    Invalid {
        /// Endpoint that was tried.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The connection dropped while a reply was pending.
    #[error("connection to the helper was interrupted")]
    Interrupted,
    /// The helper announced that it is shutting down.
    #[error("the helper is terminating")]
    TerminationImminent,
    /// No reply arrived in time.
    #[error("timed out waiting for the helper")]
    TimedOut,
    /// Any other I/O failure.
    #[error("channel I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ChannelError {
    /// Builds [`ChannelError::Invalid`].
    #[must_use]
    pub fn invalid(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Invalid {
            endpoint: endpoint.into(),
            source: Arc::new(source),
        }
    }

    /// Classifies an I/O error raised while connecting or writing.
    ///
    /// Refused, missing and reset peers mean the helper is gone.
    #[must_use]
    pub fn from_io(endpoint: impl Into<String>, error: io::Error) -> Self {
        if is_peer_gone(&error) {
            Self::invalid(endpoint, error)
        } else {
            Self::Io(Arc::new(error))
        }
    }
}

/// Returns `true` for errors meaning nothing is listening any more.
#[must_use]
pub fn is_peer_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
    )
}

/// An open channel to the helper.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Fails when the request cannot be written or no reply arrives.
    async fn request(&self, command: &str, envelope: Vec<u8>)
    -> Result<ReplyOutcome, ChannelError>;

    /// Sends a request without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Fails when the request cannot be written.
    async fn notify(&self, command: &str, envelope: Vec<u8>) -> Result<(), ChannelError>;
}

/// Opens channels to the helper.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns an open channel, reusing a live one when possible.
    ///
    /// # Errors
    ///
    /// Fails when the helper is unreachable.
    async fn connect(&self) -> Result<Arc<dyn Channel>, ChannelError>;

    /// Drops any cached channel so the next `connect` dials again.
    fn invalidate(&self);
}
