//! Structured errors exchanged between helper and client.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Why the helper refused to run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The credential was missing or could not be verified.
    InvalidCredential,
    /// The caller did not satisfy the command's trust requirement.
    IdentityMismatch,
    /// The credential does not grant the command's right.
    InsufficientRights,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::InvalidCredential => "invalid credential",
            Self::IdentityMismatch => "caller identity does not satisfy the requirement",
            Self::InsufficientRights => "insufficient rights",
        })
    }
}

/// Error payload sent by the helper in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// The running helper's version differs from the expected one.
    #[error("helper version mismatch: expected {expected}, running {actual}")]
    VersionMismatch {
        /// Version the client expected.
        expected: String,
        /// Version the helper reports.
        actual: String,
    },
    /// Authorization failed.
    #[error("authorization denied: {reason}")]
    Denied {
        /// Why the request was refused.
        reason: DenialReason,
    },
    /// The credential was shorter than any valid credential.
    #[error("credential is {actual} bytes; at least {needed} are required")]
    MalformedCredential {
        /// Smallest valid size.
        needed: usize,
        /// Size received.
        actual: usize,
    },
    /// An envelope or body did not decode.
    #[error("serialisation failed: {message}")]
    Serialization {
        /// Decoder diagnostic.
        message: String,
    },
    /// A request frame did not decode.
    #[error("malformed request frame: {message}")]
    MalformedFrame {
        /// Decoder diagnostic.
        message: String,
    },
    /// The command is not in the helper's registry.
    #[error("unknown command '{command}'")]
    UnknownCommand {
        /// Requested command.
        command: String,
    },
    /// The command is registered but has no handler.
    #[error("command '{command}' has no handler")]
    Unhandled {
        /// Requested command.
        command: String,
    },
    /// The helper's own metadata is unusable.
    #[error("helper metadata is malformed: {message}")]
    BadFormat {
        /// What is wrong.
        message: String,
    },
    /// Uninstall could not remove the helper's artefacts.
    #[error("uninstall cleanup failed: {message}")]
    Cleanup {
        /// What could not be removed.
        message: String,
    },
    /// The command's handler reported a failure.
    #[error("handler failed ({code}): {message}")]
    Handler {
        /// Handler-defined error code.
        code: i32,
        /// Handler-defined message.
        message: String,
    },
}

impl From<EnvelopeError> for RemoteError {
    fn from(error: EnvelopeError) -> Self {
        match error {
            EnvelopeError::MalformedCredential { needed, actual } => {
                Self::MalformedCredential { needed, actual }
            }
            EnvelopeError::Serialization { message } => Self::Serialization { message },
        }
    }
}

impl From<DenialReason> for RemoteError {
    fn from(reason: DenialReason) -> Self {
        Self::Denied { reason }
    }
}
