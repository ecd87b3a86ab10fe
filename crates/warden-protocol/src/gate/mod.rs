//! Client- and helper-side authorization checks.
//!
//! The client pre-authorizes its token for a command before sending, so any
//! consent UI appears in the client process. The helper re-checks the
//! credential it receives without interaction, after verifying the caller's
//! identity.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::GATE_TARGET;
use crate::authority::{AuthorityError, CredentialAuthority, Interaction, Token};
use crate::command::CommandSpec;
use crate::error::DenialReason;
use crate::identity::{IdentityVerifier, PeerIdentity};

/// Errors raised while pre-authorizing on the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// The authority refused the right.
    #[error("authorization denied: {reason}")]
    Denied {
        /// Why the right was refused.
        reason: DenialReason,
        /// Authority diagnostic.
        #[source]
        source: AuthorityError,
    },
    /// The authority could not evaluate the request.
    #[error(transparent)]
    Authority(AuthorityError),
}

impl AuthorizationError {
    /// Returns `true` when the token must be recreated.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::Authority(error) if error.is_invalid_token())
    }
}

impl From<AuthorityError> for AuthorizationError {
    fn from(source: AuthorityError) -> Self {
        match source {
            AuthorityError::Denied { .. }
            | AuthorityError::InteractionRequired { .. }
            | AuthorityError::UnknownRight { .. } => Self::Denied {
                reason: DenialReason::InsufficientRights,
                source,
            },
            other => Self::Authority(other),
        }
    }
}

/// Client-side gate.
#[derive(Clone)]
pub struct ClientGate {
    authority: Arc<dyn CredentialAuthority>,
}

impl ClientGate {
    /// Gate backed by `authority`.
    #[must_use]
    pub fn new(authority: Arc<dyn CredentialAuthority>) -> Self {
        Self { authority }
    }

    /// Extends `token` to cover exactly `spec`.
    ///
    /// Interaction is allowed only when the rule requires authentication.
    ///
    /// # Errors
    ///
    /// Fails when the authority refuses the right.
    pub async fn preauthorize(
        &self,
        token: &Token,
        spec: &CommandSpec,
    ) -> Result<(), AuthorizationError> {
        let interaction = Interaction::for_rule(spec.rule());
        debug!(
            target: GATE_TARGET,
            command = spec.name(),
            ?interaction,
            "pre-authorizing"
        );
        self.authority
            .extend_rights(token, spec.name(), interaction)
            .await
            .map_err(AuthorizationError::from)
    }
}

/// Helper-side gate.
#[derive(Clone)]
pub struct ServerGate {
    authority: Arc<dyn CredentialAuthority>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ServerGate {
    /// Gate backed by `authority` and `verifier`.
    #[must_use]
    pub fn new(
        authority: Arc<dyn CredentialAuthority>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            authority,
            verifier,
        }
    }

    /// Authority used by this gate.
    #[must_use]
    pub fn authority(&self) -> &Arc<dyn CredentialAuthority> {
        &self.authority
    }

    /// Authorizes a received credential for `spec`.
    ///
    /// The credential is decoded, then the caller's identity is checked
    /// against the command's requirement, then the right is extended without
    /// interaction. Identity is always checked before any right is extended.
    /// The returned token must be released by the caller.
    ///
    /// # Errors
    ///
    /// Returns the first failing step as a [`DenialReason`].
    pub async fn authorize(
        &self,
        credential: Option<&[u8]>,
        spec: &CommandSpec,
        peer: &PeerIdentity,
    ) -> Result<Token, DenialReason> {
        let Some(credential) = credential else {
            debug!(target: GATE_TARGET, command = spec.name(), "no credential supplied");
            return Err(DenialReason::InvalidCredential);
        };
        let token = self.authority.from_external_form(credential).map_err(|error| {
            debug!(target: GATE_TARGET, command = spec.name(), %error, "credential rejected");
            DenialReason::InvalidCredential
        })?;

        if let Some(requirement) = spec.code_signing_requirement()
            && !self.verifier.verify(peer, requirement).await
        {
            debug!(target: GATE_TARGET, command = spec.name(), %peer, "identity mismatch");
            self.authority.release(&token);
            return Err(DenialReason::IdentityMismatch);
        }

        if let Err(error) = self
            .authority
            .extend_rights(&token, spec.name(), Interaction::Denied)
            .await
        {
            debug!(target: GATE_TARGET, command = spec.name(), %error, "right not granted");
            self.authority.release(&token);
            return Err(DenialReason::InsufficientRights);
        }
        Ok(token)
    }
}
