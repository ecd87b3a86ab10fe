//! The client's public error type.

use thiserror::Error;

use warden_protocol::{
    AuthorityError, AuthorizationError, ChannelError, ContractViolation, DenialReason,
    EnvelopeError, InstallerError, RemoteError,
};

/// Errors returned by [`crate::ClientDispatcher`].
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The call site's types do not match the command's declaration.
    #[error(transparent)]
    TypeContractViolation(#[from] ContractViolation),
    /// The command is not part of this dispatcher's registry.
    #[error("command '{command}' is not registered")]
    UnknownCommand {
        /// Requested command.
        command: String,
    },
    /// A credential was shorter than any valid credential.
    #[error("credential is {actual} bytes; at least {needed} are required")]
    MalformedCredential {
        /// Smallest valid size.
        needed: usize,
        /// Size seen.
        actual: usize,
    },
    /// A request or reply could not be (de)serialised.
    #[error("serialisation failed: {message}")]
    Serialization {
        /// Serializer diagnostic.
        message: String,
    },
    /// Authorization was refused, locally or by the helper.
    #[error("authorization denied: {reason}")]
    Denied {
        /// Why the command was refused.
        reason: DenialReason,
    },
    /// The credential authority failed.
    #[error(transparent)]
    Authority(AuthorityError),
    /// The running helper is a different version.
    #[error("helper version mismatch: expected {expected}, running {actual}")]
    VersionMismatch {
        /// Version this client expects.
        expected: String,
        /// Version the helper reports.
        actual: String,
    },
    /// The helper is not reachable.
    #[error("helper is unreachable: {0}")]
    ChannelInvalid(#[source] ChannelError),
    /// The connection dropped before the reply arrived.
    #[error("connection to the helper was interrupted")]
    ChannelInterrupted,
    /// The helper is shutting down.
    #[error("the helper is terminating")]
    TerminationImminent,
    /// No reply arrived in time.
    #[error("timed out waiting for the helper")]
    TimedOut,
    /// Any other transport failure.
    #[error(transparent)]
    Channel(ChannelError),
    /// The command's handler failed.
    #[error("handler failed ({code}): {message}")]
    Handler {
        /// Handler-defined code.
        code: i32,
        /// Handler-defined message.
        message: String,
    },
    /// The helper refused the request for another reason.
    #[error(transparent)]
    Remote(RemoteError),
    /// Installing or removing the helper failed.
    #[error(transparent)]
    Install(#[from] InstallerError),
}

impl ClientError {
    /// Returns `true` for failures that a reinstall may cure.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ChannelInvalid(_) | Self::VersionMismatch { .. })
    }

    /// Returns `true` when the local token must be recreated.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::Authority(error) if error.is_invalid_token())
    }
}

impl From<ChannelError> for ClientError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Invalid { .. } => Self::ChannelInvalid(error),
            ChannelError::Interrupted => Self::ChannelInterrupted,
            ChannelError::TerminationImminent => Self::TerminationImminent,
            ChannelError::TimedOut => Self::TimedOut,
            other => Self::Channel(other),
        }
    }
}

impl From<RemoteError> for ClientError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::VersionMismatch { expected, actual } => {
                Self::VersionMismatch { expected, actual }
            }
            RemoteError::Denied { reason } => Self::Denied { reason },
            RemoteError::MalformedCredential { needed, actual } => {
                Self::MalformedCredential { needed, actual }
            }
            RemoteError::Serialization { message } => Self::Serialization { message },
            RemoteError::Handler { code, message } => Self::Handler { code, message },
            other => Self::Remote(other),
        }
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(error: EnvelopeError) -> Self {
        match error {
            EnvelopeError::MalformedCredential { needed, actual } => {
                Self::MalformedCredential { needed, actual }
            }
            EnvelopeError::Serialization { message } => Self::Serialization { message },
        }
    }
}

impl From<AuthorizationError> for ClientError {
    fn from(error: AuthorizationError) -> Self {
        match error {
            AuthorizationError::Denied { reason, .. } => Self::Denied { reason },
            AuthorizationError::Authority(source) => Self::Authority(source),
        }
    }
}

impl From<AuthorityError> for ClientError {
    fn from(error: AuthorityError) -> Self {
        Self::from(AuthorizationError::from(error))
    }
}
