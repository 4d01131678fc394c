//! Versioned envelope around cached payloads
//!
//! Every structured entry is written as `{payload, written_at, format_version}`.
//! Decoding checks the version before touching the payload, so missing,
//! mismatched and corrupt entries all surface as a [`CacheError`] that the
//! stores turn into a miss.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

/// A decoded cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub payload: T,
    pub written_at: DateTime<Utc>,
    pub format_version: String,
}

/// Timestamp and version of an entry, without its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub written_at: DateTime<Utc>,
    pub format_version: String,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    payload: &'a T,
    written_at: DateTime<Utc>,
    format_version: &'a str,
}

#[derive(Deserialize)]
struct RawEnvelope<P> {
    payload: P,
    written_at: DateTime<Utc>,
    format_version: String,
}

/// Serialize `payload` into an envelope stamped with `version` and `written_at`
pub fn encode<T: Serialize>(
    payload: &T,
    version: &str,
    written_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        payload,
        written_at,
        format_version: version,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode an envelope, requiring `expected_version`
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected_version: &str) -> Result<Envelope<T>> {
    let raw: RawEnvelope<serde_json::Value> =
        serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptEntry(e.to_string()))?;

    if raw.format_version != expected_version {
        return Err(CacheError::VersionMismatch {
            found: raw.format_version,
            expected: expected_version.to_string(),
        });
    }

    let payload = serde_json::from_value(raw.payload)
        .map_err(|e| CacheError::CorruptEntry(format!("payload: {}", e)))?;
    Ok(Envelope {
        payload,
        written_at: raw.written_at,
        format_version: raw.format_version,
    })
}

/// Decode only the timestamp and version
pub fn decode_header(bytes: &[u8]) -> Result<EnvelopeHeader> {
    let raw: RawEnvelope<IgnoredAny> =
        serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptEntry(e.to_string()))?;
    Ok(EnvelopeHeader {
        written_at: raw.written_at,
        format_version: raw.format_version,
    })
}
