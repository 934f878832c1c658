//! Versioned envelope for remote objects.
//!
//! Every object body carries an explicit schema version so future field
//! additions never silently corrupt older readers: an unknown newer
//! version is rejected, not mis-parsed.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::errors::{SyncError, SyncResult};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// What an envelope's payload is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    Note,
    TagCollection,
}

impl EnvelopeKind {
    fn name(&self) -> &'static str {
        match self {
            EnvelopeKind::Note => "note",
            EnvelopeKind::TagCollection => "tagCollection",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    schema_version: u32,
    kind: EnvelopeKind,
    payload: T,
}

/// Serialize a payload into envelope bytes
pub fn seal<T: Serialize>(kind: EnvelopeKind, payload: &T) -> SyncResult<Vec<u8>> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        kind,
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse envelope bytes, checking version and kind before touching the
/// payload
pub fn open<T: DeserializeOwned>(bytes: &[u8], expected: EnvelopeKind) -> SyncResult<T> {
    // Probe the header first so a future payload shape doesn't surface
    // as a confusing payload parse error.
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Header {
        schema_version: u32,
        kind: EnvelopeKind,
    }

    let header: Header = serde_json::from_slice(bytes)?;
    if header.schema_version > SCHEMA_VERSION {
        return Err(SyncError::UnsupportedSchema(header.schema_version));
    }
    if header.kind != expected {
        return Err(SyncError::EnvelopeKind {
            expected: expected.name(),
        });
    }

    let envelope: Envelope<T> = serde_json::from_slice(bytes)?;
    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let bytes = seal(EnvelopeKind::Note, &vec![1u32, 2, 3]).unwrap();
        let payload: Vec<u32> = open(&bytes, EnvelopeKind::Note).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let bytes = seal(EnvelopeKind::Note, &42u32).unwrap();
        assert!(matches!(
            open::<u32>(&bytes, EnvelopeKind::TagCollection),
            Err(SyncError::EnvelopeKind { .. })
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let bytes =
            br#"{"schemaVersion": 999, "kind": "note", "payload": {"whoKnows": true}}"#;
        assert!(matches!(
            open::<serde_json::Value>(bytes, EnvelopeKind::Note),
            Err(SyncError::UnsupportedSchema(999))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(open::<u32>(b"not json", EnvelopeKind::Note).is_err());
    }
}
