//! Append-only audit trail
//!
//! Entries form a SHA-256 hash chain: each entry commits to its own fields
//! and to the previous entry's hash, so any edit or deletion breaks
//! [`verify_chain`].

use crate::types::ProposalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Hash of the (virtual) entry before the first one
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Proposal submitted
    ProposalCreated,
    /// Parameters changed while pending
    ParametersAmended,
    /// Status changed
    StatusTransition,
    /// Router picked a kind
    RoutingDecision,
    /// Rubric score persisted
    ScoreRecorded,
    /// Improvement cycle opened
    CycleCreated,
    /// Improvement cycle closed
    CycleResolved,
    /// Improvement attempts exhausted
    Escalation,
}

impl AuditKind {
    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProposalCreated => "proposal_created",
            Self::ParametersAmended => "parameters_amended",
            Self::StatusTransition => "status_transition",
            Self::RoutingDecision => "routing_decision",
            Self::ScoreRecorded => "score_recorded",
            Self::CycleCreated => "cycle_created",
            Self::CycleResolved => "cycle_resolved",
            Self::Escalation => "escalation",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::ProposalCreated,
            Self::ParametersAmended,
            Self::StatusTransition,
            Self::RoutingDecision,
            Self::ScoreRecorded,
            Self::CycleCreated,
            Self::CycleResolved,
            Self::Escalation,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry before it is sealed into the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Related proposal
    pub proposal_id: Option<ProposalId>,
    /// Entry kind
    pub kind: AuditKind,
    /// Who acted (reviewer, dispatcher id, `system`)
    pub actor: String,
    /// Structured detail
    pub detail: serde_json::Value,
}

impl AuditRecord {
    /// New record
    #[must_use]
    pub fn new(
        proposal_id: Option<ProposalId>,
        kind: AuditKind,
        actor: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            proposal_id,
            kind,
            actor: actor.into(),
            detail,
        }
    }
}

/// A sealed audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log
    pub seq: i64,
    /// Unique event id
    pub event_id: Ulid,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
    /// Related proposal
    pub proposal_id: Option<ProposalId>,
    /// Entry kind
    pub kind: AuditKind,
    /// Actor
    pub actor: String,
    /// Structured detail
    pub detail: serde_json::Value,
    /// Hash of the previous entry
    #[serde(with = "hex_hash")]
    pub prev_hash: [u8; 32],
    /// Hash of this entry
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
}

impl AuditEntry {
    /// Seal a record onto the chain
    #[must_use]
    pub fn seal(
        seq: i64,
        record: AuditRecord,
        prev_hash: [u8; 32],
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            seq,
            event_id: Ulid::new(),
            recorded_at,
            proposal_id: record.proposal_id,
            kind: record.kind,
            actor: record.actor,
            detail: record.detail,
            prev_hash,
            hash: GENESIS_HASH,
        };
        entry.hash = compute_hash(&entry);
        entry
    }
}

/// Chain verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuditIntegrityError {
    /// An entry does not point at its predecessor
    #[error("audit entry {seq} does not link to its predecessor")]
    BrokenLink {
        /// Offending entry
        seq: i64,
    },
    /// An entry's contents do not match its hash
    #[error("audit entry {seq} was modified")]
    Tampered {
        /// Offending entry
        seq: i64,
    },
}

/// Verify an ordered run of entries starting at the genesis entry
///
/// # Errors
/// The first broken link or tampered entry
pub fn verify_chain(entries: &[AuditEntry]) -> Result<usize, AuditIntegrityError> {
    let mut prev = GENESIS_HASH;
    for entry in entries {
        if entry.prev_hash != prev {
            return Err(AuditIntegrityError::BrokenLink { seq: entry.seq });
        }
        if entry.hash != compute_hash(entry) {
            return Err(AuditIntegrityError::Tampered { seq: entry.seq });
        }
        prev = entry.hash;
    }
    Ok(entries.len())
}

fn compute_hash(entry: &AuditEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.event_id.to_bytes());
    hasher.update(entry.recorded_at.timestamp_millis().to_le_bytes());
    hasher.update(entry.proposal_id.map_or(-1, |id| id.0).to_le_bytes());
    hasher.update(entry.kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.actor.as_bytes());
    hasher.update([0]);
    hasher.update(entry.detail.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(hash: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(hash))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
