//! SQLite-backed store: connection handling and the proposal lifecycle.
//!
//! Every status change is a single `UPDATE ... WHERE id = ? AND status = ?`
//! inside a `BEGIN IMMEDIATE` transaction, together with its audit entry.
//! When several handles share one database file, exactly one writer wins each
//! compare-and-swap; the others see a `StateTransitionError` (review) or a
//! lost claim.

use crate::audit::append;
use crate::cycles::close_open_cycle;
use crate::error::StoreError;
use crate::rows::{millis, parse_with, row_to_proposal, PROPOSAL_COLUMNS};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steward_core::{
    is_review_transition, validate_transition, AnalysisKind, AuditKind, AuditRecord, CycleOutcome,
    NewProposal, Parameters, Proposal, ProposalId, ProposalStatus, Review, RiskLevel,
    StateTransitionError, ValidationError,
};

/// Reason recorded on proposals whose claim outlived the TTL
pub const CLAIM_EXPIRED: &str = "claim expired";

/// Durable store shared by the orchestrator and dispatchers
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// `StoreError` if the file or its parent directory cannot be created,
    /// or the schema cannot be applied
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        crate::schema::configure(&conn)?;
        crate::schema::create_tables(&conn)?;
        tracing::debug!(path = %path.display(), "opened store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database
    ///
    /// # Errors
    /// `StoreError` if the schema cannot be applied
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        crate::schema::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run blocking database work on the blocking pool
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    // -------------------------------------------------------------------------
    // Proposals
    // -------------------------------------------------------------------------

    /// Persist a new PENDING proposal
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn insert_proposal(&self, new: NewProposal) -> Result<Proposal, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let proposal = insert_proposal_tx(&tx, &new)?;
            tx.commit()?;
            Ok(proposal)
        })
        .await
    }

    /// Load one proposal
    ///
    /// # Errors
    /// `StoreError::NotFound` for unknown ids
    pub async fn get_proposal(&self, id: ProposalId) -> Result<Proposal, StoreError> {
        self.call(move |conn| load_proposal(conn, id)).await
    }

    /// Proposals, optionally filtered by status, oldest first
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals \
                 WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, id"
            ))?;
            let proposals = stmt
                .query_map(params![status.map(ProposalStatus::as_str)], row_to_proposal)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(proposals)
        })
        .await
    }

    /// Apply a human review (PENDING -> APPROVED | REJECTED).
    ///
    /// Rejecting a remediation proposal closes its improvement cycle as
    /// failed in the same transaction.
    ///
    /// # Errors
    /// - `StoreError::NotFound` for unknown ids
    /// - `StoreError::Transition` when the proposal is no longer PENDING
    /// - `StoreError::Validation` when approving a risk-blocked proposal
    pub async fn review_proposal(
        &self,
        id: ProposalId,
        review: Review,
    ) -> Result<Proposal, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = load_proposal(&tx, id)?;
            let to = review.target_status();
            if !is_review_transition(current.status, to) {
                return Err(StateTransitionError {
                    from: current.status,
                    to,
                }
                .into());
            }
            if to == ProposalStatus::Approved && current.risk_level == RiskLevel::Blocked {
                return Err(ValidationError::RiskBlocked(id).into());
            }

            let notes = review.trimmed_notes().map(str::to_string);
            let changed = tx.execute(
                "UPDATE proposals SET status = ?1, reviewer = ?2, reviewed_at = ?3, \
                 review_notes = ?4 WHERE id = ?5 AND status = ?6",
                params![
                    to.as_str(),
                    review.reviewer,
                    millis(Utc::now()),
                    notes,
                    id.0,
                    ProposalStatus::Pending.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(refused(&tx, id, to));
            }
            append(
                &tx,
                AuditRecord::new(
                    Some(id),
                    AuditKind::StatusTransition,
                    review.reviewer.clone(),
                    json!({ "from": current.status, "to": to, "notes": notes }),
                ),
            )?;
            if to == ProposalStatus::Rejected {
                close_open_cycle(&tx, id, None, CycleOutcome::Failed, "remediation rejected")?;
            }

            let updated = load_proposal(&tx, id)?;
            tx.commit()?;
            tracing::info!(proposal_id = %id, status = %to, reviewer = %review.reviewer, "proposal reviewed");
            Ok(updated)
        })
        .await
    }

    /// Replace the parameters of a PENDING proposal
    ///
    /// # Errors
    /// `StoreError::Validation` once the proposal has left PENDING
    pub async fn amend_parameters(
        &self,
        id: ProposalId,
        parameters: Parameters,
        risk_level: RiskLevel,
        actor: String,
    ) -> Result<Proposal, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = load_proposal(&tx, id)?;
            if current.status != ProposalStatus::Pending {
                return Err(ValidationError::ParametersFrozen(current.status).into());
            }
            let text = serde_json::to_string(&parameters)?;
            let changed = tx.execute(
                "UPDATE proposals SET parameters = ?1, risk_level = ?2 \
                 WHERE id = ?3 AND status = ?4",
                params![
                    text,
                    risk_level.as_str(),
                    id.0,
                    ProposalStatus::Pending.as_str()
                ],
            )?;
            if changed == 0 {
                let status = current_status(&tx, id)?;
                return Err(ValidationError::ParametersFrozen(status).into());
            }
            append(
                &tx,
                AuditRecord::new(
                    Some(id),
                    AuditKind::ParametersAmended,
                    actor,
                    json!({
                        "before": current.parameters,
                        "after": parameters,
                        "risk_level": risk_level,
                    }),
                ),
            )?;
            let updated = load_proposal(&tx, id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Claim an APPROVED proposal for execution (APPROVED -> RUNNING).
    ///
    /// Returns `None` when another dispatcher got there first.
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn claim(
        &self,
        id: ProposalId,
        dispatcher: String,
    ) -> Result<Option<Proposal>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute(
                "UPDATE proposals SET status = ?1, claimed_by = ?2, claimed_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    ProposalStatus::Running.as_str(),
                    dispatcher,
                    millis(Utc::now()),
                    id.0,
                    ProposalStatus::Approved.as_str(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            append(
                &tx,
                AuditRecord::new(
                    Some(id),
                    AuditKind::StatusTransition,
                    dispatcher,
                    json!({ "from": ProposalStatus::Approved, "to": ProposalStatus::Running }),
                ),
            )?;
            let claimed = load_proposal(&tx, id)?;
            tx.commit()?;
            Ok(Some(claimed))
        })
        .await
    }

    /// Record the routing decision for a RUNNING proposal
    ///
    /// # Errors
    /// `StoreError::Transition` if the proposal is not RUNNING
    pub async fn record_routing(
        &self,
        id: ProposalId,
        kind: AnalysisKind,
        risk_level: RiskLevel,
        actor: String,
        detail: serde_json::Value,
    ) -> Result<Proposal, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute(
                "UPDATE proposals SET resolved_kind = ?1, risk_level = ?2 \
                 WHERE id = ?3 AND status = ?4",
                params![
                    kind.as_str(),
                    risk_level.as_str(),
                    id.0,
                    ProposalStatus::Running.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(refused(&tx, id, ProposalStatus::Running));
            }
            append(
                &tx,
                AuditRecord::new(Some(id), AuditKind::RoutingDecision, actor, detail),
            )?;
            let updated = load_proposal(&tx, id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    /// Move a proposal to FAILED with the verbatim reason.
    ///
    /// A linked open improvement cycle is closed as failed.
    ///
    /// # Errors
    /// `StoreError::Transition` if the proposal is not in `from` or `from`
    /// cannot fail
    pub async fn fail_proposal(
        &self,
        id: ProposalId,
        from: ProposalStatus,
        reason: String,
        actor: String,
    ) -> Result<Proposal, StoreError> {
        validate_transition(from, ProposalStatus::Failed)?;
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            fail_tx(&tx, id, from, &reason, &actor, Utc::now())?;
            let updated = load_proposal(&tx, id)?;
            tx.commit()?;
            tracing::warn!(proposal_id = %id, %reason, "proposal failed");
            Ok(updated)
        })
        .await
    }

    /// Fail every RUNNING claim taken before `cutoff`
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn reap_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        actor: String,
    ) -> Result<Vec<ProposalId>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let stale: Vec<ProposalId> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM proposals WHERE status = ?1 AND claimed_at < ?2 ORDER BY id",
                )?;
                let ids = stmt
                    .query_map(
                        params![ProposalStatus::Running.as_str(), millis(cutoff)],
                        |row| row.get(0).map(ProposalId),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };
            let now = Utc::now();
            for id in &stale {
                fail_tx(&tx, *id, ProposalStatus::Running, CLAIM_EXPIRED, &actor, now)?;
            }
            tx.commit()?;
            if !stale.is_empty() {
                tracing::warn!(count = stale.len(), "reaped expired claims");
            }
            Ok(stale)
        })
        .await
    }
}

pub(crate) fn insert_proposal_tx(
    conn: &Connection,
    new: &NewProposal,
) -> Result<Proposal, StoreError> {
    let parameters = serde_json::to_string(&new.parameters)?;
    conn.execute(
        "INSERT INTO proposals (capability, intent, parameters, status, creator, created_at, \
         risk_level) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.capability.map(|c| c.name()),
            new.intent,
            parameters,
            ProposalStatus::Pending.as_str(),
            new.creator.as_str(),
            millis(Utc::now()),
            new.risk_level.as_str(),
        ],
    )?;
    let id = ProposalId(conn.last_insert_rowid());
    append(
        conn,
        AuditRecord::new(
            Some(id),
            AuditKind::ProposalCreated,
            new.creator.as_str(),
            json!({
                "capability": new.capability,
                "intent": new.intent,
                "parameters": new.parameters,
                "risk_level": new.risk_level,
            }),
        ),
    )?;
    tracing::info!(proposal_id = %id, creator = %new.creator, "proposal created");
    load_proposal(conn, id)
}

pub(crate) fn load_proposal(conn: &Connection, id: ProposalId) -> Result<Proposal, StoreError> {
    conn.query_row(
        &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
        params![id.0],
        row_to_proposal,
    )
    .optional()?
    .ok_or_else(|| not_found(id))
}

fn current_status(conn: &Connection, id: ProposalId) -> Result<ProposalStatus, StoreError> {
    conn.query_row(
        "SELECT status FROM proposals WHERE id = ?1",
        params![id.0],
        |row| parse_with(row, 0, "status", ProposalStatus::parse),
    )
    .optional()?
    .ok_or_else(|| not_found(id))
}

/// Error for a compare-and-swap that matched no row
fn refused(conn: &Connection, id: ProposalId, to: ProposalStatus) -> StoreError {
    match current_status(conn, id) {
        Ok(from) => StateTransitionError { from, to }.into(),
        Err(e) => e,
    }
}

fn fail_tx(
    conn: &Connection,
    id: ProposalId,
    from: ProposalStatus,
    reason: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE proposals SET status = ?1, failure_reason = ?2, finished_at = ?3 \
         WHERE id = ?4 AND status = ?5",
        params![
            ProposalStatus::Failed.as_str(),
            reason,
            millis(at),
            id.0,
            from.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(refused(conn, id, ProposalStatus::Failed));
    }
    append(
        conn,
        AuditRecord::new(
            Some(id),
            AuditKind::StatusTransition,
            actor,
            json!({ "from": from, "to": ProposalStatus::Failed, "reason": reason }),
        ),
    )?;
    close_open_cycle(conn, id, None, CycleOutcome::Failed, "remediation failed")?;
    Ok(())
}

pub(crate) fn not_found(id: ProposalId) -> StoreError {
    StoreError::NotFound(format!("proposal {id}"))
}
