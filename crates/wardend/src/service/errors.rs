//! Errors raised by handlers and while registering them.

use thiserror::Error;

use warden_protocol::{ContractViolation, RemoteError};

/// Failure reported by a command handler.
///
/// The code and message reach the client unchanged as
/// [`RemoteError::Handler`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed ({code}): {message}")]
pub struct HandlerError {
    code: i32,
    message: String,
}

impl HandlerError {
    /// Builds a handler error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Handler-defined code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Handler-defined message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<HandlerError> for RemoteError {
    fn from(error: HandlerError) -> Self {
        Self::Handler {
            code: error.code,
            message: error.message,
        }
    }
}

/// Reasons a handler cannot be installed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerRegistrationError {
    /// The handler's types differ from the command's declaration.
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    /// The command is not part of the service's registry.
    #[error("command '{command}' is not registered")]
    UnknownCommand {
        /// Command name.
        command: String,
    },
    /// Built-in commands are answered by the service itself.
    #[error("command '{command}' is a built-in and cannot be handled")]
    BuiltIn {
        /// Command name.
        command: String,
    },
    /// A handler is already installed for the command.
    #[error("command '{command}' already has a handler")]
    Duplicate {
        /// Command name.
        command: String,
    },
}
