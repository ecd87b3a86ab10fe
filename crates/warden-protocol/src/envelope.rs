//! The message envelope and its codec.
//!
//! An envelope pairs a body with the caller's portable credential and the
//! helper version the caller expects. It is serialised as a JSON object:
//!
//! ```json
//! {"authorization":[...],"expected_version":"2","body":"ping"}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential, expected version and body of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<B> {
    /// Portable credential bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Vec<u8>>,
    /// Helper version the sender expects.
    #[serde(default)]
    pub expected_version: Option<String>,
    /// Payload.
    pub body: B,
}

impl<B> Envelope<B> {
    /// Request envelope.
    pub const fn request(
        authorization: Option<Vec<u8>>,
        expected_version: Option<String>,
        body: B,
    ) -> Self {
        Self {
            authorization,
            expected_version,
            body,
        }
    }

    /// Reply envelope; replies carry neither credential nor version.
    pub const fn reply(body: B) -> Self {
        Self {
            authorization: None,
            expected_version: None,
            body,
        }
    }
}

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The credential is shorter than the authority's smallest valid form.
    #[error("credential is {actual} bytes; at least {needed} are required")]
    MalformedCredential {
        /// Smallest valid size.
        needed: usize,
        /// Size received.
        actual: usize,
    },
    /// The envelope or its body could not be (de)serialised.
    #[error("envelope serialisation failed: {message}")]
    Serialization {
        /// Serializer diagnostic.
        message: String,
    },
}

impl EnvelopeError {
    fn serialization(error: &serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

/// Encodes and decodes envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodec {
    min_credential_len: usize,
}

impl EnvelopeCodec {
    /// Codec enforcing a minimum credential length.
    #[must_use]
    pub const fn new(min_credential_len: usize) -> Self {
        Self { min_credential_len }
    }

    /// Minimum accepted credential length.
    #[must_use]
    pub const fn min_credential_len(&self) -> usize {
        self.min_credential_len
    }

    /// Serialises an envelope.
    ///
    /// # Errors
    ///
    /// Fails when the body cannot be represented, for example maps with
    /// non-string keys.
    pub fn encode<B: Serialize>(&self, envelope: &Envelope<B>) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(envelope).map_err(|error| EnvelopeError::serialization(&error))
    }

    /// Decodes an envelope, leaving the body untyped.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or a credential below the minimum length.
    pub fn decode_raw(&self, bytes: &[u8]) -> Result<Envelope<serde_json::Value>, EnvelopeError> {
        let envelope: Envelope<serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|error| EnvelopeError::serialization(&error))?;
        if let Some(credential) = &envelope.authorization
            && credential.len() < self.min_credential_len
        {
            return Err(EnvelopeError::MalformedCredential {
                needed: self.min_credential_len,
                actual: credential.len(),
            });
        }
        Ok(envelope)
    }

    /// Decodes an envelope with a typed body.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::decode_raw`], or when the body has the wrong shape.
    pub fn decode<B: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Envelope<B>, EnvelopeError> {
        let raw = self.decode_raw(bytes)?;
        let body = decode_body(raw.body)?;
        Ok(Envelope {
            authorization: raw.authorization,
            expected_version: raw.expected_version,
            body,
        })
    }
}

/// Converts an untyped body into `B`.
///
/// # Errors
///
/// Fails when the value does not have the shape of `B`.
pub fn decode_body<B: DeserializeOwned>(body: serde_json::Value) -> Result<B, EnvelopeError> {
    serde_json::from_value(body).map_err(|error| EnvelopeError::serialization(&error))
}

/// Converts a typed body into an untyped value.
///
/// # Errors
///
/// Fails when the body cannot be represented as JSON.
pub fn encode_body<B: Serialize>(body: &B) -> Result<serde_json::Value, EnvelopeError> {
    serde_json::to_value(body).map_err(|error| EnvelopeError::serialization(&error))
}
