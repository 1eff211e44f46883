//! Hash-chained audit log
//!
//! Entries are only ever appended, always inside the transaction that makes
//! the change they describe. Writers hold an IMMEDIATE transaction, so the
//! tail read and the insert cannot interleave across connections.

use crate::error::StoreError;
use crate::rows::{millis, row_to_audit, AUDIT_COLUMNS};
use crate::store::SqliteStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use steward_core::audit::{verify_chain, AuditEntry, AuditRecord, GENESIS_HASH};
use steward_core::ProposalId;

/// Append one record to the chain
pub(crate) fn append(conn: &Connection, record: AuditRecord) -> Result<AuditEntry, StoreError> {
    let tail: Option<(i64, String)> = conn
        .query_row(
            "SELECT seq, hash FROM audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (seq, prev_hash) = match tail {
        Some((seq, hash)) => {
            let mut prev = [0u8; 32];
            hex::decode_to_slice(&hash, &mut prev).map_err(|_| {
                StoreError::Integrity(steward_core::AuditIntegrityError::Tampered { seq })
            })?;
            (seq + 1, prev)
        }
        None => (1, GENESIS_HASH),
    };

    let entry = AuditEntry::seal(seq, record, prev_hash, Utc::now());
    conn.execute(
        "INSERT INTO audit_log (seq, event_id, recorded_at, proposal_id, kind, actor, detail, \
         prev_hash, hash) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.seq,
            entry.event_id.to_string(),
            millis(entry.recorded_at),
            entry.proposal_id.map(|id| id.0),
            entry.kind.as_str(),
            entry.actor,
            entry.detail.to_string(),
            hex::encode(entry.prev_hash),
            hex::encode(entry.hash),
        ],
    )?;
    tracing::trace!(seq = entry.seq, kind = %entry.kind, "audit entry appended");
    Ok(entry)
}

impl SqliteStore {
    /// Audit entries for one proposal, oldest first
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn audit_trail(&self, id: ProposalId) -> Result<Vec<AuditEntry>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE proposal_id = ?1 ORDER BY seq"
            ))?;
            let entries = stmt
                .query_map(params![id.0], row_to_audit)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    /// The whole audit log, oldest first
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn audit_log(&self) -> Result<Vec<AuditEntry>, StoreError> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq"))?;
            let entries = stmt
                .query_map([], row_to_audit)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    /// Recompute every hash in the log
    ///
    /// # Errors
    /// `StoreError::Integrity` naming the first bad entry
    pub async fn verify_audit_chain(&self) -> Result<usize, StoreError> {
        let entries = self.audit_log().await?;
        let checked = verify_chain(&entries)?;
        tracing::debug!(entries = checked, "audit chain verified");
        Ok(checked)
    }
}
