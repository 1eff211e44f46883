//! Improvement cycles
//!
//! The attempt bound lives in the schema (`UNIQUE (capability, dimension,
//! window_id, attempt)` and `CHECK (attempt BETWEEN 1 AND 3)`); exhaustion
//! is a count query in the same transaction that would insert the next row.

use crate::audit::append;
use crate::error::StoreError;
use crate::rows::{millis, row_to_cycle, CYCLE_COLUMNS};
use crate::store::{insert_proposal_tx, SqliteStore};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::json;
use steward_core::{
    resolve_outcome, AuditKind, AuditRecord, Capability, CycleOpening, CycleOutcome, CyclePlan,
    Creator, ImprovementCycle, NewProposal, ProposalId, ScoreRecord, MAX_IMPROVEMENT_ATTEMPTS,
};

impl SqliteStore {
    /// Open the next improvement cycle for `plan`, inserting its remediation
    /// proposal atomically.
    ///
    /// When the window's attempts are spent, nothing is inserted: still-open
    /// cycles of the pair are marked escalated and an escalation entry
    /// carrying `context` is audited instead.
    ///
    /// # Errors
    /// `StoreError::Conflict` if a concurrent writer took the same attempt
    pub async fn open_improvement_cycle(
        &self,
        plan: CyclePlan,
        remediation: NewProposal,
        context: serde_json::Value,
    ) -> Result<CycleOpening, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let attempts: u32 = tx.query_row(
                "SELECT COUNT(*) FROM improvement_cycles \
                 WHERE capability = ?1 AND dimension = ?2 AND window_id = ?3",
                params![plan.capability.name(), plan.dimension.as_str(), plan.window.0],
                |row| row.get(0),
            )?;

            if attempts >= MAX_IMPROVEMENT_ATTEMPTS {
                escalate_tx(&tx, &plan, attempts, context)?;
                tx.commit()?;
                tracing::warn!(
                    capability = %plan.capability,
                    dimension = %plan.dimension,
                    attempts,
                    "improvement attempts exhausted; escalated"
                );
                return Ok(CycleOpening::Exhausted { attempts });
            }

            let proposal = insert_proposal_tx(&tx, &remediation)?;
            let attempt = attempts + 1;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO improvement_cycles (capability, dimension, window_id, attempt, \
                 before_score, outcome, proposal_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    plan.capability.name(),
                    plan.dimension.as_str(),
                    plan.window.0,
                    attempt,
                    plan.before_score,
                    CycleOutcome::Open.as_str(),
                    proposal.id.0,
                    millis(now),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                    StoreError::Conflict(format!(
                        "improvement attempt {attempt} for {}/{} already exists",
                        plan.capability, plan.dimension
                    ))
                }
                other => other.into(),
            })?;
            let cycle_id = tx.last_insert_rowid();
            append(
                &tx,
                AuditRecord::new(
                    Some(proposal.id),
                    AuditKind::CycleCreated,
                    Creator::System.as_str(),
                    json!({
                        "cycle_id": cycle_id,
                        "capability": plan.capability,
                        "dimension": plan.dimension,
                        "window": plan.window.0,
                        "attempt": attempt,
                        "before_score": plan.before_score,
                        "context": context,
                    }),
                ),
            )?;
            let cycle = load_cycle(&tx, cycle_id)?;
            tx.commit()?;
            tracing::info!(
                capability = %plan.capability,
                dimension = %plan.dimension,
                attempt,
                proposal_id = %proposal.id,
                "improvement cycle opened"
            );
            Ok(CycleOpening::Opened(cycle))
        })
        .await
    }

    /// Cycle whose remediation proposal is `id`
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn cycle_for_proposal(
        &self,
        id: ProposalId,
    ) -> Result<Option<ImprovementCycle>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CYCLE_COLUMNS} FROM improvement_cycles WHERE proposal_id = ?1"),
                    params![id.0],
                    row_to_cycle,
                )
                .optional()?)
        })
        .await
    }

    /// Cycles, optionally for one capability, oldest first
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn list_cycles(
        &self,
        capability: Option<Capability>,
    ) -> Result<Vec<ImprovementCycle>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CYCLE_COLUMNS} FROM improvement_cycles \
                 WHERE (?1 IS NULL OR capability = ?1) ORDER BY id"
            ))?;
            let cycles = stmt
                .query_map(params![capability.map(Capability::name)], row_to_cycle)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(cycles)
        })
        .await
    }
}

fn load_cycle(conn: &Connection, id: i64) -> Result<ImprovementCycle, StoreError> {
    conn.query_row(
        &format!("SELECT {CYCLE_COLUMNS} FROM improvement_cycles WHERE id = ?1"),
        params![id],
        row_to_cycle,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("improvement cycle {id}")))
}

fn open_cycle(conn: &Connection, id: ProposalId) -> Result<Option<ImprovementCycle>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CYCLE_COLUMNS} FROM improvement_cycles \
                 WHERE proposal_id = ?1 AND outcome = ?2"
            ),
            params![id.0, CycleOutcome::Open.as_str()],
            row_to_cycle,
        )
        .optional()?)
}

/// Resolve the open cycle of a just-scored remediation by the change in its
/// dimension's score
pub(crate) fn resolve_scored_cycle(
    conn: &Connection,
    id: ProposalId,
    score: &ScoreRecord,
    min_delta: f64,
) -> Result<Option<ImprovementCycle>, StoreError> {
    let Some(open) = open_cycle(conn, id)? else {
        return Ok(None);
    };
    let after = score.score(open.dimension);
    let outcome = resolve_outcome(open.before_score, after, min_delta);
    close_open_cycle(conn, id, after, outcome, "remediation scored")
}

/// Close the open cycle of a remediation proposal, if there is one
pub(crate) fn close_open_cycle(
    conn: &Connection,
    id: ProposalId,
    after_score: Option<f64>,
    outcome: CycleOutcome,
    reason: &str,
) -> Result<Option<ImprovementCycle>, StoreError> {
    let Some(open) = open_cycle(conn, id)? else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE improvement_cycles SET outcome = ?1, after_score = ?2, resolved_at = ?3 \
         WHERE id = ?4 AND outcome = ?5",
        params![
            outcome.as_str(),
            after_score,
            millis(Utc::now()),
            open.id,
            CycleOutcome::Open.as_str(),
        ],
    )?;
    append(
        conn,
        AuditRecord::new(
            Some(id),
            AuditKind::CycleResolved,
            Creator::System.as_str(),
            json!({
                "cycle_id": open.id,
                "capability": open.capability,
                "dimension": open.dimension,
                "attempt": open.attempt,
                "before_score": open.before_score,
                "after_score": after_score,
                "outcome": outcome,
                "reason": reason,
            }),
        ),
    )?;
    tracing::info!(
        proposal_id = %id,
        capability = %open.capability,
        dimension = %open.dimension,
        %outcome,
        "improvement cycle resolved"
    );
    load_cycle(conn, open.id).map(Some)
}

fn escalate_tx(
    conn: &Connection,
    plan: &CyclePlan,
    attempts: u32,
    context: serde_json::Value,
) -> Result<(), StoreError> {
    let still_open: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM improvement_cycles \
             WHERE capability = ?1 AND dimension = ?2 AND window_id = ?3 AND outcome = ?4 \
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(
                params![
                    plan.capability.name(),
                    plan.dimension.as_str(),
                    plan.window.0,
                    CycleOutcome::Open.as_str()
                ],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let now = millis(Utc::now());
    for id in &still_open {
        conn.execute(
            "UPDATE improvement_cycles SET outcome = ?1, resolved_at = ?2 WHERE id = ?3",
            params![CycleOutcome::Escalated.as_str(), now, id],
        )?;
    }
    append(
        conn,
        AuditRecord::new(
            None,
            AuditKind::Escalation,
            Creator::System.as_str(),
            json!({
                "capability": plan.capability,
                "dimension": plan.dimension,
                "window": plan.window.0,
                "attempts": attempts,
                "weakest_mean": plan.before_score,
                "escalated_cycles": still_open,
                "context": context,
            }),
        ),
    )?;
    Ok(())
}
