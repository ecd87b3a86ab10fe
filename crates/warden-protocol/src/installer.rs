//! Privileged-service installer interface.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// What the client expects the installed helper to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    helper_id: String,
    version: String,
    requirement: Option<String>,
}

impl ServiceIdentity {
    /// Builds an identity.
    #[must_use]
    pub fn new(helper_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            helper_id: helper_id.into(),
            version: version.into(),
            requirement: None,
        }
    }

    /// Requirement the installed helper itself must satisfy.
    #[must_use]
    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = Some(requirement.into());
        self
    }

    /// Helper identifier.
    #[must_use]
    pub fn helper_id(&self) -> &str {
        &self.helper_id
    }

    /// Expected version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Trust requirement for the helper.
    #[must_use]
    pub fn requirement(&self) -> Option<&str> {
        self.requirement.as_deref()
    }
}

/// Whether the OS knows about the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// The helper is installed and registered.
    Registered,
    /// The helper is not installed.
    Unregistered,
    /// The installer cannot tell.
    Unknown,
}

/// Errors raised by an installer.
#[derive(Debug, Clone, Error)]
pub enum InstallerError {
    /// A filesystem step failed.
    #[error("failed to {action} '{path}': {source}")]
    Io {
        /// What was being done.
        action: &'static str,
        /// Path involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The service manager could not be run or reported failure.
    #[error("service manager '{program}' failed: {message}")]
    ServiceManager {
        /// Program that was run.
        program: String,
        /// Exit status or launch error.
        message: String,
    },
    /// The helper was installed but never became reachable.
    #[error("helper did not start listening on {endpoint}")]
    NotReady {
        /// Endpoint polled.
        endpoint: String,
    },
    /// The installer refused or failed for another reason.
    #[error("installation failed: {0}")]
    Failed(String),
}

impl InstallerError {
    /// Builds [`InstallerError::Io`].
    #[must_use]
    pub fn io(action: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Installs and removes the privileged helper.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Installs (or replaces) the helper and waits until it is reachable.
    ///
    /// # Errors
    ///
    /// Fails when any install step fails.
    async fn install(&self, identity: &ServiceIdentity) -> Result<(), InstallerError>;

    /// Removes the helper. Removing an absent helper succeeds.
    ///
    /// # Errors
    ///
    /// Fails when an existing registration cannot be removed.
    async fn uninstall(&self, identity: &ServiceIdentity) -> Result<(), InstallerError>;

    /// Reports whether the helper is registered.
    ///
    /// # Errors
    ///
    /// Fails when the registration state cannot be queried at all.
    async fn status(&self, identity: &ServiceIdentity)
    -> Result<RegistrationStatus, InstallerError>;
}
