//! Domain entities

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncBlob;

/// Account record holding the remotely-persisted key material.
///
/// The wrapped-DEK fields are absent until first-time encryption setup
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Identifier from the hosted auth provider
    pub external_id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_salt_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_dek_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_dek_iv_b64: Option<String>,
}

impl UserRecord {
    /// Create a record at first sign-in, before encryption setup
    pub fn new(external_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            email: email.into(),
            enc_salt_b64: None,
            enc_iterations: None,
            wrapped_dek_b64: None,
            wrapped_dek_iv_b64: None,
        }
    }

    /// Whether first-time encryption setup has completed
    pub fn has_key_material(&self) -> bool {
        self.enc_salt_b64.is_some()
            && self.enc_iterations.is_some()
            && self.wrapped_dek_b64.is_some()
            && self.wrapped_dek_iv_b64.is_some()
    }
}

/// A note. Sensitive fields are stored as independent ciphertexts;
/// plaintext exists only transiently in memory after decryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_enc: Option<EncBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_enc: Option<EncBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_enc: Option<EncBlob>,
    /// Referenced tag ids. May dangle if a tag was deleted elsewhere;
    /// consumers must tolerate a missing tag lookup.
    #[serde(default)]
    pub tags: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tag. Name and color are encrypted like note fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name_enc: EncBlob,
    pub color_enc: EncBlob,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of entity a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Note,
    Tag,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Note => write!(f, "note"),
            EntityKind::Tag => write!(f, "tag"),
        }
    }
}

/// Compute the next `updated_at` for an entity.
///
/// Strictly greater than the previous value even if the wall clock went
/// backwards — `updated_at` is the sole merge-conflict signal and must
/// be monotonic per entity per local write.
pub fn next_updated_at(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + chrono::Duration::milliseconds(1),
        _ => now,
    }
}
