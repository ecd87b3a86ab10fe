//! HMAC-sealed credential authority.
//!
//! Client and helper share a key. Tokens live in a per-process table; their
//! portable form carries the granted rights sealed with HMAC-SHA256:
//!
//! ```text
//! tag[32] | handle[16] | sealed_at[8, big endian seconds] | rights (JSON array)
//! ```
//!
//! # Trust model
//!
//! The seal proves only that the form was produced by a holder of the key.
//! Anyone able to read the key can mint a form carrying any right, including
//! rights whose rule demands administrator authentication, so consent is only
//! as strong as the key file's permissions. The key file is therefore limited
//! to deployments where client and helper run as the same trusted principal,
//! such as the bundled demo binaries and tests. A helper serving less trusted
//! callers needs an authority whose grants live on the helper side.
//!
//! The importing side's own rule table still has the last word: a right it
//! does not define is unknown, and a right it defines as `deny` is refused
//! whatever the form carries.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::{AuthorityError, ConsentPrompt, CredentialAuthority, Interaction, RightDefinition, Token};
use crate::AUTHORITY_TARGET;
use crate::command::Rule;

type HmacSha256 = Hmac<Sha256>;

const TAG_LEN: usize = 32;
const HANDLE_LEN: usize = 16;
const SEALED_AT_LEN: usize = 8;
const KEY_LEN: usize = 32;

/// Errors raised while loading the shared key.
#[derive(Debug, Error)]
pub enum AuthorityKeyError {
    /// The key contained no bytes.
    #[error("authority key must not be empty")]
    Empty,
    /// The key file could not be read or created.
    #[error("failed to access authority key '{path}': {source}")]
    Io {
        /// Key file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

#[derive(Debug, Default)]
struct Grant {
    rights: BTreeSet<String>,
}

/// Authority issuing HMAC-sealed portable credentials.
pub struct SealedTokenAuthority {
    mac: HmacSha256,
    ttl: Duration,
    prompt: Arc<dyn ConsentPrompt>,
    grants: RwLock<HashMap<Uuid, Grant>>,
    definitions: RwLock<HashMap<String, RightDefinition>>,
}

impl std::fmt::Debug for SealedTokenAuthority {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SealedTokenAuthority")
            .field("ttl", &self.ttl)
            .field("grants", &self.grants.read().len())
            .field("definitions", &self.definitions.read().len())
            .finish_non_exhaustive()
    }
}

impl SealedTokenAuthority {
    /// Smallest valid portable form.
    pub const MINIMUM_FORM_LEN: usize = TAG_LEN + HANDLE_LEN + SEALED_AT_LEN;

    /// Builds an authority from an in-memory key.
    ///
    /// # Errors
    ///
    /// Fails when the key is empty.
    pub fn new(
        key: impl Into<Vec<u8>>,
        ttl: Duration,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Result<Self, AuthorityKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(AuthorityKeyError::Empty);
        }
        let mac = HmacSha256::new_from_slice(&key).map_err(|_| AuthorityKeyError::Empty)?;
        Ok(Self {
            mac,
            ttl,
            prompt,
            grants: RwLock::new(HashMap::new()),
            definitions: RwLock::new(HashMap::new()),
        })
    }

    /// Builds an authority from a key file, generating the file when absent.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or created, or is empty.
    pub fn from_key_file(
        path: &Path,
        ttl: Duration,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Result<Self, AuthorityKeyError> {
        let io_error = |source| AuthorityKeyError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        };
        let key = match fs::read(path) {
            Ok(key) => key,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                let mut key = vec![0_u8; KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                write_key(path, &key).map_err(io_error)?;
                key
            }
            Err(error) => return Err(io_error(error)),
        };
        Self::new(key, ttl, prompt)
    }

    fn grant(&self, right: &str, token: &Token) -> Result<(), AuthorityError> {
        let mut grants = self.grants.write();
        let grant = grants
            .get_mut(&token.handle())
            .ok_or(AuthorityError::InvalidToken)?;
        grant.rights.insert(right.to_owned());
        debug!(target: AUTHORITY_TARGET, %token, right, "right granted");
        Ok(())
    }
}

fn write_key(path: &Path, key: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    io::Write::write_all(&mut file, key)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn unverifiable(reason: impl Into<String>) -> AuthorityError {
    AuthorityError::Unverifiable {
        reason: reason.into(),
    }
}

#[async_trait]
impl CredentialAuthority for SealedTokenAuthority {
    fn create_token(&self) -> Result<Token, AuthorityError> {
        let handle = Uuid::new_v4();
        self.grants.write().insert(handle, Grant::default());
        Ok(Token::from_handle(handle))
    }

    #[expect(
        clippy::big_endian_bytes,
        reason = "the sealed layout fixes network byte order"
    )]
    fn external_form(&self, token: &Token) -> Result<Vec<u8>, AuthorityError> {
        let rights = {
            let grants = self.grants.read();
            let grant = grants
                .get(&token.handle())
                .ok_or(AuthorityError::InvalidToken)?;
            serde_json::to_vec(&grant.rights).map_err(|error| unverifiable(error.to_string()))?
        };

        let mut payload = Vec::with_capacity(HANDLE_LEN + SEALED_AT_LEN + rights.len());
        payload.extend_from_slice(token.handle().as_bytes());
        payload.extend_from_slice(&now_secs().to_be_bytes());
        payload.extend_from_slice(&rights);

        let mut mac = self.mac.clone();
        mac.update(&payload);
        let mut sealed = mac.finalize().into_bytes().to_vec();
        sealed.extend_from_slice(&payload);
        Ok(sealed)
    }

    #[expect(
        clippy::big_endian_bytes,
        reason = "the sealed layout fixes network byte order"
    )]
    fn from_external_form(&self, bytes: &[u8]) -> Result<Token, AuthorityError> {
        let (tag, payload) = bytes
            .split_at_checked(TAG_LEN)
            .ok_or_else(|| unverifiable("credential is truncated"))?;
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(tag)
            .map_err(|_| unverifiable("seal does not match"))?;

        let (origin, rest) = payload
            .split_at_checked(HANDLE_LEN)
            .ok_or_else(|| unverifiable("credential is truncated"))?;
        let (sealed_at, rights) = rest
            .split_at_checked(SEALED_AT_LEN)
            .ok_or_else(|| unverifiable("credential is truncated"))?;
        let sealed_at = <[u8; SEALED_AT_LEN]>::try_from(sealed_at)
            .map(u64::from_be_bytes)
            .map_err(|_| unverifiable("credential is truncated"))?;
        if now_secs().saturating_sub(sealed_at) > self.ttl.as_secs() {
            return Err(AuthorityError::Expired);
        }
        let rights: BTreeSet<String> =
            serde_json::from_slice(rights).map_err(|error| unverifiable(error.to_string()))?;

        let handle = Uuid::new_v4();
        debug!(
            target: AUTHORITY_TARGET,
            origin = %Uuid::from_slice(origin).unwrap_or_default(),
            local = %handle,
            rights = rights.len(),
            "credential verified"
        );
        self.grants.write().insert(handle, Grant { rights });
        Ok(Token::from_handle(handle))
    }

    async fn extend_rights(
        &self,
        token: &Token,
        right: &str,
        interaction: Interaction,
    ) -> Result<(), AuthorityError> {
        let definition = self.definitions.read().get(right).cloned().ok_or_else(|| {
            AuthorityError::UnknownRight {
                right: right.to_owned(),
            }
        })?;
        let already_held = self
            .grants
            .read()
            .get(&token.handle())
            .map(|grant| grant.rights.contains(right))
            .ok_or(AuthorityError::InvalidToken)?;

        let rule = definition.rule();
        if *rule != Rule::ALLOW && !rule.requires_authentication() {
            return Err(AuthorityError::Denied {
                right: right.to_owned(),
            });
        }
        if already_held {
            return Ok(());
        }
        if *rule == Rule::ALLOW {
            return self.grant(right, token);
        }
        if interaction == Interaction::Denied {
            return Err(AuthorityError::InteractionRequired {
                right: right.to_owned(),
            });
        }
        if self.prompt.confirm(right, definition.prompt()).await {
            self.grant(right, token)
        } else {
            Err(AuthorityError::Denied {
                right: right.to_owned(),
            })
        }
    }

    fn release(&self, token: &Token) {
        if self.grants.write().remove(&token.handle()).is_some() {
            debug!(target: AUTHORITY_TARGET, %token, "token released");
        }
    }

    fn is_valid(&self, token: &Token) -> bool {
        self.grants.read().contains_key(&token.handle())
    }

    fn define_right(&self, definition: &RightDefinition) -> bool {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(definition.name()) {
            return false;
        }
        definitions.insert(definition.name().to_owned(), definition.clone());
        true
    }

    fn minimum_external_form_len(&self) -> usize {
        Self::MINIMUM_FORM_LEN
    }
}
