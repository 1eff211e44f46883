//! Row mapping between SQLite and domain types

use crate::error::UnknownValue;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use steward_core::audit::AuditEntry;
use steward_core::{
    AnalysisKind, AnalysisOutput, AnalysisResult, AuditKind, Capability, Creator, CycleOutcome,
    Dimension, DimensionScores, GradeBand, ImprovementCycle, Parameters, Proposal, ProposalId,
    ProposalStatus, RiskLevel, ScoreRecord, WindowId,
};

pub(crate) const PROPOSAL_COLUMNS: &str = "id, capability, intent, parameters, status, creator, \
     created_at, reviewer, reviewed_at, review_notes, risk_level, claimed_by, claimed_at, \
     resolved_kind, failure_reason, finished_at";

pub(crate) const CYCLE_COLUMNS: &str = "id, capability, dimension, window_id, attempt, \
     before_score, after_score, outcome, proposal_id, created_at, resolved_at";

pub(crate) const SCORE_COLUMNS: &str =
    "proposal_id, capability, dimensions, composite, grade, scored_at";

pub(crate) const AUDIT_COLUMNS: &str =
    "seq, event_id, recorded_at, proposal_id, kind, actor, detail, prev_hash, hash";

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn unknown(idx: usize, what: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(UnknownValue {
            what,
            value: value.to_string(),
        }),
    )
}

fn json<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_with<T>(
    row: &Row<'_>,
    idx: usize,
    what: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| unknown(idx, what, &text))
}

fn parse_opt_with<T>(
    row: &Row<'_>,
    idx: usize,
    what: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => parse(&text).map(Some).ok_or_else(|| unknown(idx, what, &text)),
        None => Ok(None),
    }
}

fn opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(from_millis))
}

pub(crate) fn row_to_proposal(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    let parameters: String = row.get(3)?;
    let creator: String = row.get(5)?;
    Ok(Proposal {
        id: ProposalId(row.get(0)?),
        capability: parse_opt_with(row, 1, "capability", Capability::parse)?,
        intent: row.get(2)?,
        parameters: json::<Parameters>(3, &parameters)?,
        status: parse_with(row, 4, "status", ProposalStatus::parse)?,
        creator: Creator::from_stored(&creator),
        created_at: from_millis(row.get(6)?),
        reviewer: row.get(7)?,
        reviewed_at: opt_time(row, 8)?,
        review_notes: row.get(9)?,
        risk_level: parse_with(row, 10, "risk level", RiskLevel::parse)?,
        claimed_by: row.get(11)?,
        claimed_at: opt_time(row, 12)?,
        resolved_kind: parse_opt_with(row, 13, "analysis kind", AnalysisKind::parse)?,
        failure_reason: row.get(14)?,
        finished_at: opt_time(row, 15)?,
    })
}

/// Columns: proposal_id, analysis_kind, body, created_at
pub(crate) fn row_to_result(row: &Row<'_>) -> rusqlite::Result<AnalysisResult> {
    let body: String = row.get(2)?;
    Ok(AnalysisResult {
        proposal_id: ProposalId(row.get(0)?),
        analysis_kind: parse_with(row, 1, "analysis kind", AnalysisKind::parse)?,
        output: json::<AnalysisOutput>(2, &body)?,
        created_at: from_millis(row.get(3)?),
    })
}

pub(crate) fn row_to_score(row: &Row<'_>) -> rusqlite::Result<ScoreRecord> {
    let dimensions: String = row.get(2)?;
    Ok(ScoreRecord {
        proposal_id: ProposalId(row.get(0)?),
        capability: parse_with(row, 1, "capability", Capability::parse)?,
        dimensions: json::<DimensionScores>(2, &dimensions)?,
        composite: row.get(3)?,
        grade: parse_with(row, 4, "grade", GradeBand::parse)?,
        scored_at: from_millis(row.get(5)?),
    })
}

pub(crate) fn row_to_cycle(row: &Row<'_>) -> rusqlite::Result<ImprovementCycle> {
    Ok(ImprovementCycle {
        id: row.get(0)?,
        capability: parse_with(row, 1, "capability", Capability::parse)?,
        dimension: parse_with(row, 2, "dimension", Dimension::parse)?,
        window: WindowId(row.get(3)?),
        attempt: row.get(4)?,
        before_score: row.get(5)?,
        after_score: row.get(6)?,
        outcome: parse_with(row, 7, "cycle outcome", CycleOutcome::parse)?,
        proposal_id: ProposalId(row.get(8)?),
        created_at: from_millis(row.get(9)?),
        resolved_at: opt_time(row, 10)?,
    })
}

fn hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let text: String = row.get(idx)?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(&text, &mut out).map_err(|_| unknown(idx, "hash", &text))?;
    Ok(out)
}

pub(crate) fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let event_id: String = row.get(1)?;
    let detail: String = row.get(6)?;
    Ok(AuditEntry {
        seq: row.get(0)?,
        event_id: event_id
            .parse()
            .map_err(|_| unknown(1, "event id", &event_id))?,
        recorded_at: from_millis(row.get(2)?),
        proposal_id: row.get::<_, Option<i64>>(3)?.map(ProposalId),
        kind: parse_with(row, 4, "audit kind", AuditKind::parse)?,
        actor: row.get(5)?,
        detail: json(6, &detail)?,
        prev_hash: hash_column(row, 7)?,
        hash: hash_column(row, 8)?,
    })
}
