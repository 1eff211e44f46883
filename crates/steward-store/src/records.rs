//! Results, scores and completion counters

use crate::audit::append;
use crate::cycles::resolve_scored_cycle;
use crate::error::StoreError;
use crate::rows::{millis, row_to_result, row_to_score, SCORE_COLUMNS};
use crate::store::{not_found, SqliteStore};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::json;
use steward_core::{
    AnalysisResult, AuditKind, AuditRecord, Capability, ImprovementCycle, Parameters, ProposalId,
    ProposalStatus, ScoreRecord, StateTransitionError,
};

/// What committing a completion changed
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Capability completion counter after this one
    pub completions: u64,
    /// Improvement cycle closed by this completion, if the proposal was a
    /// remediation
    pub cycle: Option<ImprovementCycle>,
}

impl SqliteStore {
    /// Complete a RUNNING proposal in one transaction: persist its result and
    /// score, bump the capability's completion counter and resolve the
    /// improvement cycle the proposal remediates, if any.
    ///
    /// # Errors
    /// `StoreError::Transition` if the proposal is not RUNNING;
    /// `StoreError::Conflict` if the score belongs to another proposal or
    /// already exists. Nothing is written on error.
    pub async fn complete_proposal(
        &self,
        result: AnalysisResult,
        score: ScoreRecord,
        min_delta: f64,
        actor: String,
    ) -> Result<Completion, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = result.proposal_id;
            let kind = result.analysis_kind;
            let capability = kind.capability();
            if score.proposal_id != id {
                return Err(StoreError::Conflict(format!(
                    "score for proposal {} offered with result of proposal {id}",
                    score.proposal_id
                )));
            }

            let changed = tx.execute(
                "UPDATE proposals SET status = ?1, resolved_kind = ?2, finished_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    ProposalStatus::Completed.as_str(),
                    kind.as_str(),
                    millis(result.created_at),
                    id.0,
                    ProposalStatus::Running.as_str(),
                ],
            )?;
            if changed == 0 {
                let from: Option<String> = tx
                    .query_row(
                        "SELECT status FROM proposals WHERE id = ?1",
                        params![id.0],
                        |row| row.get(0),
                    )
                    .optional()?;
                let from = from
                    .as_deref()
                    .and_then(ProposalStatus::parse)
                    .ok_or_else(|| not_found(id))?;
                return Err(StateTransitionError {
                    from,
                    to: ProposalStatus::Completed,
                }
                .into());
            }

            tx.execute(
                "INSERT INTO results (proposal_id, analysis_kind, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.0,
                    kind.as_str(),
                    serde_json::to_string(&result.output)?,
                    millis(result.created_at),
                ],
            )?;
            tx.execute(
                "INSERT INTO completion_counters (capability, completed) VALUES (?1, 1) \
                 ON CONFLICT(capability) DO UPDATE SET completed = completed + 1",
                params![capability.name()],
            )?;
            let completions: u64 = tx.query_row(
                "SELECT completed FROM completion_counters WHERE capability = ?1",
                params![capability.name()],
                |row| row.get(0),
            )?;
            append(
                &tx,
                AuditRecord::new(
                    Some(id),
                    AuditKind::StatusTransition,
                    actor.clone(),
                    json!({
                        "from": ProposalStatus::Running,
                        "to": ProposalStatus::Completed,
                        "kind": kind,
                        "capability_completions": completions,
                    }),
                ),
            )?;
            insert_score_tx(&tx, &score, &actor)?;
            let cycle = resolve_scored_cycle(&tx, id, &score, min_delta)?;
            tx.commit()?;
            tracing::info!(
                proposal_id = %id,
                %capability,
                %kind,
                completions,
                composite = ?score.composite,
                "proposal completed"
            );
            Ok(Completion { completions, cycle })
        })
        .await
    }

    /// Persisted result of a proposal
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn get_result(&self, id: ProposalId) -> Result<Option<AnalysisResult>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT proposal_id, analysis_kind, body, created_at FROM results \
                     WHERE proposal_id = ?1",
                    params![id.0],
                    row_to_result,
                )
                .optional()?)
        })
        .await
    }

    /// Score record of a proposal
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn get_score(&self, id: ProposalId) -> Result<Option<ScoreRecord>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {SCORE_COLUMNS} FROM scores WHERE proposal_id = ?1"),
                    params![id.0],
                    row_to_score,
                )
                .optional()?)
        })
        .await
    }

    /// Most recent `limit` scores of a capability, newest first
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn recent_scores(
        &self,
        capability: Capability,
        limit: usize,
    ) -> Result<Vec<ScoreRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCORE_COLUMNS} FROM scores WHERE capability = ?1 \
                 ORDER BY scored_at DESC, proposal_id DESC LIMIT ?2"
            ))?;
            let scores = stmt
                .query_map(params![capability.name(), limit], row_to_score)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(scores)
        })
        .await
    }

    /// Completed executions of a capability
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn completion_count(&self, capability: Capability) -> Result<u64, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT completed FROM completion_counters WHERE capability = ?1",
                    params![capability.name()],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0))
        })
        .await
    }

    /// Parameters of the most recently scored proposal of a capability
    ///
    /// # Errors
    /// `StoreError` on database failure
    pub async fn latest_parameters(
        &self,
        capability: Capability,
    ) -> Result<Option<Parameters>, StoreError> {
        self.call(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT p.parameters FROM proposals p JOIN scores s ON s.proposal_id = p.id \
                     WHERE s.capability = ?1 ORDER BY s.scored_at DESC, p.id DESC LIMIT 1",
                    params![capability.name()],
                    |row| row.get(0),
                )
                .optional()?;
            text.map(|t| serde_json::from_str(&t).map_err(StoreError::from))
                .transpose()
        })
        .await
    }
}

fn insert_score_tx(
    conn: &Connection,
    record: &ScoreRecord,
    actor: &str,
) -> Result<(), StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO scores \
         (proposal_id, capability, dimensions, composite, grade, scored_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.proposal_id.0,
            record.capability.name(),
            serde_json::to_string(&record.dimensions)?,
            record.composite,
            record.grade.as_str(),
            millis(record.scored_at),
        ],
    )?;
    if inserted == 0 {
        return Err(StoreError::Conflict(format!(
            "proposal {} already scored",
            record.proposal_id
        )));
    }
    append(
        conn,
        AuditRecord::new(
            Some(record.proposal_id),
            AuditKind::ScoreRecorded,
            actor,
            json!({
                "capability": record.capability,
                "dimensions": record.dimensions,
                "composite": record.composite,
                "grade": record.grade,
                "degraded": record.degraded(),
            }),
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use steward_core::{
        AnalysisKind, AnalysisOutput, Creator, CycleOpening, CycleOutcome, CyclePlan, Dimension,
        GradeThresholds, NewProposal, Review, RiskLevel, WindowId,
    };

    fn stockout() -> NewProposal {
        let mut parameters = Parameters::new();
        parameters.insert("store".into(), json!("28"));
        parameters.insert("days".into(), json!(14));
        NewProposal {
            capability: Some(Capability::StockoutAnalyzer),
            intent: None,
            parameters,
            creator: Creator::human("dana"),
            risk_level: RiskLevel::Low,
        }
    }

    async fn claim(store: &SqliteStore, id: ProposalId) -> ProposalId {
        store.review_proposal(id, Review::approve("lee")).await.unwrap();
        store.claim(id, "d1".into()).await.unwrap().unwrap();
        id
    }

    async fn running(store: &SqliteStore) -> ProposalId {
        let p = store.insert_proposal(stockout()).await.unwrap();
        claim(store, p.id).await
    }

    fn result(id: ProposalId) -> AnalysisResult {
        AnalysisResult::new(
            id,
            AnalysisKind::IntradayStockout,
            AnalysisOutput {
                title: "Intraday stock-outs".into(),
                executive_summary: "Milk runs out by 3pm".into(),
                findings: vec![],
                evidence: vec![],
                impact: None,
                methodology: "hourly on-hand".into(),
                confidence: 0.8,
                data_sources: vec!["pos".into()],
            },
            Utc::now(),
        )
    }

    fn score(id: ProposalId, dims: &[(Dimension, Option<f64>)]) -> ScoreRecord {
        ScoreRecord::new(
            id,
            Capability::StockoutAnalyzer,
            dims.iter().copied().collect(),
            &GradeThresholds::default(),
            Utc::now(),
        )
    }

    async fn complete(store: &SqliteStore, id: ProposalId) -> Result<Completion, StoreError> {
        let record = score(id, &[(Dimension::Brevity, Some(9.0))]);
        store
            .complete_proposal(result(id), record, 0.3, "d1".into())
            .await
    }

    #[tokio::test]
    async fn completion_persists_result_score_and_counts() {
        let store = SqliteStore::in_memory().unwrap();
        let a = running(&store).await;
        let b = running(&store).await;
        assert_eq!(complete(&store, a).await.unwrap().completions, 1);
        assert_eq!(complete(&store, b).await.unwrap().completions, 2);
        assert_eq!(store.completion_count(Capability::StockoutAnalyzer).await.unwrap(), 2);
        assert_eq!(store.completion_count(Capability::BasketAnalyzer).await.unwrap(), 0);

        let stored = store.get_result(a).await.unwrap().unwrap();
        assert_eq!(stored.output.title, "Intraday stock-outs");
        assert_eq!(store.get_score(a).await.unwrap().unwrap().score(Dimension::Brevity), Some(9.0));
        let proposal = store.get_proposal(a).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Completed);
        assert_eq!(proposal.resolved_kind, Some(AnalysisKind::IntradayStockout));

        let kinds: Vec<AuditKind> = store
            .audit_trail(a)
            .await
            .unwrap()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds.last(), Some(&AuditKind::ScoreRecorded));
    }

    #[tokio::test]
    async fn completing_twice_is_a_transition_error() {
        let store = SqliteStore::in_memory().unwrap();
        let id = running(&store).await;
        complete(&store, id).await.unwrap();
        let err = complete(&store, id).await.unwrap_err();
        assert!(matches!(err, StoreError::Transition(e) if e.from == ProposalStatus::Completed));
        assert_eq!(store.completion_count(Capability::StockoutAnalyzer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_score_insert_rolls_back_the_completion() {
        let store = SqliteStore::in_memory().unwrap();
        let id = running(&store).await;
        // a stray score row makes the score insert fail after the status update
        store
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scores (proposal_id, capability, dimensions, grade, scored_at) \
                     VALUES (?1, 'StockoutAnalyzer', '{}', 'draft', 0)",
                    params![id.0],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = complete(&store, id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_proposal(id).await.unwrap().status, ProposalStatus::Running);
        assert!(store.get_result(id).await.unwrap().is_none());
        assert_eq!(store.completion_count(Capability::StockoutAnalyzer).await.unwrap(), 0);
        assert!(store
            .audit_trail(id)
            .await
            .unwrap()
            .iter()
            .all(|e| e.detail["to"] != json!(ProposalStatus::Completed)));
    }

    #[tokio::test]
    async fn score_for_another_proposal_is_refused() {
        let store = SqliteStore::in_memory().unwrap();
        let id = running(&store).await;
        let other = running(&store).await;
        let err = store
            .complete_proposal(result(id), score(other, &[]), 0.3, "d1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_proposal(id).await.unwrap().status, ProposalStatus::Running);
        assert_eq!(complete(&store, id).await.unwrap().completions, 1);
    }

    #[tokio::test]
    async fn scores_round_trip_with_not_applicable_dimensions() {
        let store = SqliteStore::in_memory().unwrap();
        let id = running(&store).await;
        let record = score(
            id,
            &[
                (Dimension::AudienceFit, Some(8.0)),
                (Dimension::Actionability, Some(6.0)),
                (Dimension::DataIntegrity, None),
            ],
        );
        store
            .complete_proposal(result(id), record.clone(), 0.3, "d1".into())
            .await
            .unwrap();

        let loaded = store.get_score(id).await.unwrap().unwrap();
        assert_eq!(loaded.dimensions, record.dimensions);
        assert_eq!(loaded.composite, Some(7.0));

        let recent = store.recent_scores(Capability::StockoutAnalyzer, 10).await.unwrap();
        assert_eq!(recent.len(), 1);

        let params = store
            .latest_parameters(Capability::StockoutAnalyzer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params.get("days"), Some(&json!(14)));
    }

    #[tokio::test]
    async fn completing_a_remediation_resolves_its_cycle() {
        let store = SqliteStore::in_memory().unwrap();
        let plan = CyclePlan {
            capability: Capability::StockoutAnalyzer,
            dimension: Dimension::Brevity,
            window: WindowId(2930),
            before_score: 4.0,
        };
        let CycleOpening::Opened(cycle) = store
            .open_improvement_cycle(plan, stockout(), json!({}))
            .await
            .unwrap()
        else {
            panic!("expected a cycle");
        };
        let id = claim(&store, cycle.proposal_id).await;

        let completion = store
            .complete_proposal(
                result(id),
                score(id, &[(Dimension::Brevity, Some(4.5))]),
                0.3,
                "d1".into(),
            )
            .await
            .unwrap();
        let closed = completion.cycle.unwrap();
        assert_eq!(closed.id, cycle.id);
        assert_eq!(closed.outcome, CycleOutcome::Succeeded);
        assert_eq!(closed.after_score, Some(4.5));
        assert_eq!(
            store.cycle_for_proposal(id).await.unwrap().unwrap().outcome,
            CycleOutcome::Succeeded
        );
    }

    #[tokio::test]
    async fn ordinary_completion_touches_no_cycle() {
        let store = SqliteStore::in_memory().unwrap();
        let id = running(&store).await;
        assert!(complete(&store, id).await.unwrap().cycle.is_none());
    }
}
