//! Versioned envelope for exported workflow documents.
//!
//! Every exported document carries a format version next to its payload so
//! older exports can be recognised (and rejected or upgraded) on import.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

/// Why a document could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not JSON, or not shaped like an envelope.
    Malformed { reason: String },
    UnsupportedVersion { version: u32 },
    /// The envelope is fine but the payload does not decode.
    InvalidPayload { reason: String },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed document: {reason}"),
            Self::UnsupportedVersion { version } => write!(
                f,
                "unsupported document version {version} (expected {CURRENT_VERSION})"
            ),
            Self::InvalidPayload { reason } => write!(f, "invalid document payload: {reason}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl<T> Envelope<T> {
    /// Wraps a payload in the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes a document, checking the version before the payload.
    ///
    /// # Errors
    ///
    /// See [`EnvelopeError`].
    pub fn open(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: Envelope<serde_json::Value> =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed {
                reason: e.to_string(),
            })?;
        if raw.version != CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                version: raw.version,
            });
        }

        let payload = serde_json::from_value(raw.payload).map_err(|e| {
            EnvelopeError::InvalidPayload {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            version: raw.version,
            payload,
        })
    }
}
