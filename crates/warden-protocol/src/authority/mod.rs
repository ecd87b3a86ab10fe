//! Credential authority interface.
//!
//! An authority issues opaque [`Token`]s, grants rights on them and converts
//! them to and from a portable byte form that travels inside the message
//! envelope.

mod sealed;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::command::{CommandSpec, Rule};

pub use sealed::{AuthorityKeyError, SealedTokenAuthority};

/// Opaque handle to a credential held by an authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(Uuid);

impl Token {
    /// Wraps an authority-specific handle.
    #[must_use]
    pub const fn from_handle(handle: Uuid) -> Self {
        Self(handle)
    }

    /// Authority-specific handle.
    #[must_use]
    pub const fn handle(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "token:{}", self.0)
    }
}

/// Whether the authority may ask the user for consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Consent UI may be shown.
    Allowed,
    /// The grant must succeed without UI.
    Denied,
}

impl Interaction {
    /// Chooses interaction for a rule.
    #[must_use]
    pub fn for_rule(rule: &Rule) -> Self {
        if rule.requires_authentication() {
            Self::Allowed
        } else {
            Self::Denied
        }
    }
}

/// A right registered with the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RightDefinition {
    name: String,
    rule: Rule,
    prompt: Option<String>,
}

impl RightDefinition {
    /// Builds a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, rule: Rule, prompt: Option<String>) -> Self {
        Self {
            name: name.into(),
            rule,
            prompt,
        }
    }

    /// Definition derived from a command spec.
    #[must_use]
    pub fn for_command(spec: &CommandSpec) -> Self {
        Self::new(
            spec.name(),
            spec.rule().clone(),
            spec.prompt().map(str::to_owned),
        )
    }

    /// Right name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rule gating the right.
    #[must_use]
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Consent prompt.
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }
}

/// Errors reported by a credential authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// The token was released, expired or never issued.
    #[error("credential is no longer valid")]
    InvalidToken,
    /// The portable form failed verification.
    #[error("credential could not be verified: {reason}")]
    Unverifiable {
        /// Why verification failed.
        reason: String,
    },
    /// The portable form is older than the configured lifetime.
    #[error("credential has expired")]
    Expired,
    /// No definition exists for the right.
    #[error("right '{right}' is not defined")]
    UnknownRight {
        /// Requested right.
        right: String,
    },
    /// The right needs consent but interaction was not allowed.
    #[error("right '{right}' requires user interaction")]
    InteractionRequired {
        /// Requested right.
        right: String,
    },
    /// The rule refused, or the user declined.
    #[error("right '{right}' was denied")]
    Denied {
        /// Requested right.
        right: String,
    },
}

impl AuthorityError {
    /// Returns `true` when the token itself must be recreated.
    #[must_use]
    pub const fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::Expired)
    }
}

/// Issues credentials and grants rights on them.
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    /// Creates a fresh token holding no rights.
    ///
    /// # Errors
    ///
    /// Fails when the authority cannot issue credentials.
    fn create_token(&self) -> Result<Token, AuthorityError>;

    /// Portable byte form of a token.
    ///
    /// # Errors
    ///
    /// Fails when the token is not live.
    fn external_form(&self, token: &Token) -> Result<Vec<u8>, AuthorityError>;

    /// Rebuilds a live token from its portable form.
    ///
    /// # Errors
    ///
    /// Fails when the bytes cannot be verified.
    fn from_external_form(&self, bytes: &[u8]) -> Result<Token, AuthorityError>;

    /// Extends a token to cover `right`, optionally asking for consent.
    ///
    /// # Errors
    ///
    /// Fails when the right is refused or the token is not live.
    async fn extend_rights(
        &self,
        token: &Token,
        right: &str,
        interaction: Interaction,
    ) -> Result<(), AuthorityError>;

    /// Releases a token. Releasing twice is harmless.
    fn release(&self, token: &Token);

    /// Returns `true` while the token is live.
    fn is_valid(&self, token: &Token) -> bool;

    /// Registers a right unless it is already defined.
    ///
    /// Returns `true` when a new definition was stored. An existing
    /// definition is never overwritten.
    fn define_right(&self, definition: &RightDefinition) -> bool;

    /// Smallest valid portable form, in bytes.
    fn minimum_external_form_len(&self) -> usize;
}

/// Asks the user to consent to a right.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Returns `true` when the user consents.
    async fn confirm(&self, right: &str, prompt: Option<&str>) -> bool;
}

/// Prompt that always refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePrompt;

#[async_trait]
impl ConsentPrompt for NonInteractivePrompt {
    async fn confirm(&self, _right: &str, _prompt: Option<&str>) -> bool {
        false
    }
}

/// Prompt that always consents.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprovePrompt;

#[async_trait]
impl ConsentPrompt for AutoApprovePrompt {
    async fn confirm(&self, right: &str, _prompt: Option<&str>) -> bool {
        tracing::debug!(target: crate::AUTHORITY_TARGET, right, "consent auto-approved");
        true
    }
}
