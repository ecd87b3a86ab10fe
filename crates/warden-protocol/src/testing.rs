//! Test doubles for the collaborator traits.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::authority::{AuthorityError, CredentialAuthority, Interaction, RightDefinition, Token};
use crate::identity::{IdentityVerifier, PeerIdentity};

/// Authority that records every call and grants everything not denied.
#[derive(Debug)]
pub struct RecordingAuthority {
    min_len: usize,
    denied: Mutex<HashSet<String>>,
    live: Mutex<HashSet<Uuid>>,
    extend_calls: Mutex<Vec<(String, Interaction)>>,
    definitions: Mutex<Vec<RightDefinition>>,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl Default for RecordingAuthority {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RecordingAuthority {
    /// Authority whose portable form is `min_len` bytes long.
    #[must_use]
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len: min_len.max(16),
            denied: Mutex::new(HashSet::new()),
            live: Mutex::new(HashSet::new()),
            extend_calls: Mutex::new(Vec::new()),
            definitions: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Refuses `right` from now on.
    pub fn deny(&self, right: &str) {
        self.denied.lock().insert(right.to_owned());
    }

    /// Forgets every live token, as if the authority had restarted.
    pub fn invalidate_all(&self) {
        self.live.lock().clear();
    }

    /// Rights requested so far, in order.
    #[must_use]
    pub fn extend_calls(&self) -> Vec<(String, Interaction)> {
        self.extend_calls.lock().clone()
    }

    /// Number of `extend_rights` calls so far.
    #[must_use]
    pub fn extend_count(&self) -> usize {
        self.extend_calls.lock().len()
    }

    /// Rights defined so far.
    #[must_use]
    pub fn definitions(&self) -> Vec<RightDefinition> {
        self.definitions.lock().clone()
    }

    /// Tokens created through `create_token`.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Tokens released.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialAuthority for RecordingAuthority {
    fn create_token(&self) -> Result<Token, AuthorityError> {
        let handle = Uuid::new_v4();
        self.live.lock().insert(handle);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Token::from_handle(handle))
    }

    fn external_form(&self, token: &Token) -> Result<Vec<u8>, AuthorityError> {
        if !self.is_valid(token) {
            return Err(AuthorityError::InvalidToken);
        }
        let mut bytes = token.handle().as_bytes().to_vec();
        bytes.resize(self.min_len, 0);
        Ok(bytes)
    }

    fn from_external_form(&self, bytes: &[u8]) -> Result<Token, AuthorityError> {
        if bytes.len() < self.min_len {
            return Err(AuthorityError::Unverifiable {
                reason: "credential is truncated".to_owned(),
            });
        }
        let handle = Uuid::new_v4();
        self.live.lock().insert(handle);
        Ok(Token::from_handle(handle))
    }

    async fn extend_rights(
        &self,
        token: &Token,
        right: &str,
        interaction: Interaction,
    ) -> Result<(), AuthorityError> {
        self.extend_calls
            .lock()
            .push((right.to_owned(), interaction));
        if !self.is_valid(token) {
            return Err(AuthorityError::InvalidToken);
        }
        if self.denied.lock().contains(right) {
            return Err(AuthorityError::Denied {
                right: right.to_owned(),
            });
        }
        Ok(())
    }

    fn release(&self, token: &Token) {
        if self.live.lock().remove(&token.handle()) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_valid(&self, token: &Token) -> bool {
        self.live.lock().contains(&token.handle())
    }

    fn define_right(&self, definition: &RightDefinition) -> bool {
        let mut definitions = self.definitions.lock();
        if definitions
            .iter()
            .any(|existing| existing.name() == definition.name())
        {
            return false;
        }
        definitions.push(definition.clone());
        true
    }

    fn minimum_external_form_len(&self) -> usize {
        self.min_len
    }
}

/// Verifier returning a fixed answer and counting calls.
#[derive(Debug)]
pub struct FixedVerifier {
    answer: bool,
    calls: AtomicUsize,
}

impl FixedVerifier {
    /// Verifier accepting every peer.
    #[must_use]
    pub const fn accepting() -> Self {
        Self {
            answer: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Verifier rejecting every peer.
    #[must_use]
    pub const fn rejecting() -> Self {
        Self {
            answer: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of verifications performed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for FixedVerifier {
    async fn verify(&self, _peer: &PeerIdentity, _requirement: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
