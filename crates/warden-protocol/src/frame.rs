//! JSONL frames carried over the helper's socket.
//!
//! The client writes one [`RequestFrame`] per line. The helper answers with
//! [`ServerFrame`] lines: replies correlated by `id`, and notices addressed to
//! the whole connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RemoteError;

/// Largest accepted frame, in bytes, excluding the newline.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// A single command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Client-chosen correlation id.
    pub id: u64,
    /// Command name, used as the routing key.
    pub command: String,
    /// Encoded [`crate::Envelope`].
    pub envelope: Vec<u8>,
}

/// Result of a command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// The command ran; the envelope carries its reply.
    Ok {
        /// Encoded reply [`crate::Envelope`].
        envelope: Vec<u8>,
    },
    /// The command did not run or failed.
    Error {
        /// Structured failure.
        error: RemoteError,
    },
}

/// Reply to a [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Id of the request being answered.
    pub id: u64,
    /// Outcome of the request.
    pub outcome: ReplyOutcome,
}

/// Connection-wide notice from the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerNotice {
    /// The helper is about to exit; pending requests will not be answered.
    TerminationImminent,
}

/// Any line written by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A reply to one request.
    Reply(ReplyFrame),
    /// A notice for the whole connection.
    Notice {
        /// The notice.
        notice: ServerNotice,
    },
}

/// Errors raised while framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame exceeds [`MAX_FRAME_BYTES`].
    #[error("frame of {size} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    TooLarge {
        /// Frame size.
        size: usize,
    },
    /// The frame was not valid JSON of the expected shape.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Decoder diagnostic.
        message: String,
    },
}

/// Serialises a frame as a newline-terminated line.
///
/// # Errors
///
/// Fails when the frame cannot be serialised or exceeds the size limit.
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>, FrameError> {
    let mut line = serde_json::to_vec(frame).map_err(|error| FrameError::Malformed {
        message: error.to_string(),
    })?;
    if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { size: line.len() });
    }
    line.push(b'\n');
    Ok(line)
}

/// Parses one line, ignoring surrounding whitespace.
///
/// # Errors
///
/// Fails when the line exceeds the size limit or does not parse.
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, FrameError> {
    let trimmed = line.trim_ascii();
    if trimmed.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            size: trimmed.len(),
        });
    }
    serde_json::from_slice(trimmed).map_err(|error| FrameError::Malformed {
        message: error.to_string(),
    })
}
