//! Continuation token codec.
//!
//! A token is the JSON document
//!
//! ```text
//! {"Continuation":{"v":1,"container":"families","session":"<uuid>"}}
//! ```
//!
//! encoded as URL-safe base64 without padding. Anything that does not decode
//! to exactly this shape is malformed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use docquery_core::storage::{Result, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current token schema version.
pub const TOKEN_VERSION: u32 = 1;

/// Decoded continuation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinuationToken {
    pub v: u32,
    /// Container that issued the token.
    pub container: String,
    /// Pending session holding the remaining results.
    pub session: Uuid,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[serde(rename = "Continuation")]
    continuation: ContinuationToken,
}

impl ContinuationToken {
    pub fn new(container: impl Into<String>, session: Uuid) -> Self {
        Self {
            v: TOKEN_VERSION,
            container: container.into(),
            session,
        }
    }

    /// Opaque string form handed to callers.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(&Envelope {
            continuation: self.clone(),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse a token string. Every failure is `BadRequest`.
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| malformed("not base64"))?;
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|_| malformed("unrecognized payload"))?;
        let token = envelope.continuation;
        if token.v != TOKEN_VERSION {
            return Err(malformed(&format!("unsupported version {}", token.v)));
        }
        Ok(token)
    }
}

fn malformed(reason: &str) -> StoreError {
    StoreError::BadRequest(format!("malformed continuation token: {}", reason))
}
