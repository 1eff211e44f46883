//! Dispatcher
//!
//! One pass over APPROVED work: claim, route, execute under a timeout,
//! persist, score, and feed the self-improvement engine. Execution inside a
//! pass is strictly sequential. Nothing here is returned as an error; every
//! problem ends up in the proposal, the audit log or the [`DispatchReport`].

use crate::error::{ExecutionError, ExecutorError};
use crate::executor::ExecutorSet;
use crate::improvement::{Evaluation, ImprovementEngine};
use crate::router::IntentRouter;
use crate::scorer::RubricScorer;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use steward_core::{
    assess_risk, AnalysisKind, AnalysisOutput, AnalysisResult, Capability, CapabilityRegistry,
    Parameters, Proposal, ProposalId, ProposalStatus, RiskConfig, RiskLevel, StewardConfig,
    ValidationError,
};
use steward_store::{SqliteStore, StoreError};

/// What one dispatch pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Proposals this instance claimed
    pub claimed: usize,
    /// Claimed proposals that completed
    pub completed: usize,
    /// Claimed proposals that failed
    pub failed: usize,
    /// Claims lost to another dispatcher
    pub lost_claims: usize,
    /// Expired claims moved to FAILED
    pub reaped: Vec<ProposalId>,
    /// Remediation proposals created by the self-improvement engine
    pub improvement_proposals: Vec<ProposalId>,
    /// Evaluations that escalated instead of creating a proposal
    pub escalations: usize,
    /// Internal failures, one line each
    pub errors: Vec<String>,
}

impl DispatchReport {
    /// Nothing was claimed or reaped
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && self.lost_claims == 0 && self.reaped.is_empty()
    }
}

/// Claims and executes approved proposals
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: SqliteStore,
    registry: CapabilityRegistry,
    router: IntentRouter,
    scorer: RubricScorer,
    executors: ExecutorSet,
    improvement: ImprovementEngine,
    risk: RiskConfig,
    instance_id: String,
    timeout: Duration,
    claim_ttl: Duration,
}

impl Dispatcher {
    /// Dispatcher with a fresh instance id
    #[must_use]
    pub fn new(
        config: &StewardConfig,
        store: SqliteStore,
        registry: CapabilityRegistry,
        executors: ExecutorSet,
    ) -> Self {
        let improvement = ImprovementEngine::new(
            store.clone(),
            registry.clone(),
            config.improvement,
            config.rubric.dimensions.clone(),
            config.risk,
        );
        Self {
            router: IntentRouter::new(config.router.fallback_kind),
            scorer: RubricScorer::from_config(&config.rubric),
            risk: config.risk,
            instance_id: format!("dispatcher-{}", ulid::Ulid::new()),
            timeout: config.executor_timeout(),
            claim_ttl: config.claim_ttl(),
            store,
            registry,
            executors,
            improvement,
        }
    }

    /// Identity recorded as `claimed_by` and as the audit actor
    #[inline]
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Self-improvement engine fed by this dispatcher
    #[inline]
    #[must_use]
    pub fn improvement(&self) -> &ImprovementEngine {
        &self.improvement
    }

    /// One pass over APPROVED proposals, oldest first
    pub async fn run_once(&self) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.reap(&mut report).await;

        let approved = match self.store.list_proposals(Some(ProposalStatus::Approved)).await {
            Ok(approved) => approved,
            Err(e) => {
                tracing::error!(error = %e, "failed to list approved proposals");
                report.errors.push(format!("list approved: {e}"));
                return report;
            }
        };

        for proposal in approved {
            let id = proposal.id;
            if let Err(e) = self.dispatch(proposal, &mut report).await {
                tracing::error!(proposal_id = %id, error = %e, "dispatch failed");
                report.errors.push(format!("proposal {id}: {e}"));
            }
        }

        if !report.is_idle() {
            tracing::info!(
                dispatcher = %self.instance_id,
                claimed = report.claimed,
                completed = report.completed,
                failed = report.failed,
                lost = report.lost_claims,
                reaped = report.reaped.len(),
                "dispatch pass finished"
            );
        }
        report
    }

    async fn reap(&self, report: &mut DispatchReport) {
        let cutoff = chrono::Duration::from_std(self.claim_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        let Some(cutoff) = cutoff else {
            return;
        };
        match self
            .store
            .reap_stale_claims(cutoff, self.instance_id.clone())
            .await
        {
            Ok(reaped) => report.reaped = reaped,
            Err(e) => {
                tracing::error!(error = %e, "failed to reap expired claims");
                report.errors.push(format!("reap: {e}"));
            }
        }
    }

    async fn dispatch(
        &self,
        proposal: Proposal,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let id = proposal.id;
        let Some(claimed) = self.store.claim(id, self.instance_id.clone()).await? else {
            tracing::debug!(proposal_id = %id, "claim lost to another dispatcher");
            report.lost_claims += 1;
            return Ok(());
        };
        report.claimed += 1;

        let decision = self
            .router
            .route_proposal(claimed.capability, claimed.intent.as_deref());
        let capability = decision.capability;
        let kind = decision.kind;
        let risk_level = if claimed.capability.is_some() {
            claimed.risk_level
        } else {
            assess_risk(Some(capability), &claimed.parameters, &self.risk)
        };
        tracing::info!(
            proposal_id = %id,
            %capability,
            %kind,
            fallback = decision.fallback,
            explicit = decision.explicit,
            "routed proposal"
        );
        let detail = serde_json::to_value(&decision)?;
        self.store
            .record_routing(id, kind, risk_level, self.instance_id.clone(), detail)
            .await?;

        let outcome = match self.admit(id, capability, risk_level, &claimed.parameters) {
            Ok(()) => self.execute(capability, kind, &claimed.parameters).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(output) => self.complete(id, capability, kind, output, report).await,
            Err(e) => {
                self.store
                    .fail_proposal(
                        id,
                        ProposalStatus::Running,
                        e.to_string(),
                        self.instance_id.clone(),
                    )
                    .await?;
                report.failed += 1;
                Ok(())
            }
        }
    }

    /// Checks that only become possible once the capability is known
    fn admit(
        &self,
        id: ProposalId,
        capability: Capability,
        risk_level: RiskLevel,
        parameters: &Parameters,
    ) -> Result<(), ValidationError> {
        if risk_level == RiskLevel::Blocked {
            return Err(ValidationError::RiskBlocked(id));
        }
        self.registry.validate(capability, parameters)
    }

    async fn execute(
        &self,
        capability: Capability,
        kind: AnalysisKind,
        parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutionError> {
        let executor = self.executors.get(capability).ok_or_else(|| {
            ExecutorError::Unavailable(format!("no executor registered for {capability}"))
        })?;
        let parameters = parameters.clone();
        let handle = tokio::spawn(async move { executor.execute(kind, &parameters).await });
        let abort = handle.abort_handle();

        let output = match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => {
                abort.abort();
                return Err(ExecutionError::Timeout(self.timeout));
            }
            Ok(Err(join)) => return Err(ExecutionError::Panicked(panic_message(join))),
            Ok(Ok(result)) => result?,
        };
        output.check_contract().map_err(ExecutionError::Contract)?;
        Ok(output)
    }

    async fn complete(
        &self,
        id: ProposalId,
        capability: Capability,
        kind: AnalysisKind,
        output: AnalysisOutput,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let result = AnalysisResult::new(id, kind, output, Utc::now());
        let record = self.scorer.score(&result, capability, Utc::now());
        let completion = self
            .store
            .complete_proposal(
                result,
                record,
                self.improvement.config().min_delta,
                self.instance_id.clone(),
            )
            .await?;
        report.completed += 1;

        let every = self.improvement.config().trigger_every.max(1);
        let completions = completion.completions;
        if completions % every == 0 {
            tracing::debug!(%capability, completions, "evaluating capability");
            match self.improvement.evaluate(capability).await? {
                Evaluation::Opened(cycle) => report.improvement_proposals.push(cycle.proposal_id),
                Evaluation::Escalated { .. } => report.escalations += 1,
                Evaluation::InsufficientScores { .. }
                | Evaluation::OnTarget { .. }
                | Evaluation::NoApplicableDimension => {}
            }
        }
        Ok(())
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "executor task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panic_payloads_are_extracted() {
        let err = tokio::spawn(async { panic!("disk on fire") }).await.unwrap_err();
        assert_eq!(panic_message(err), "disk on fire");

        let code = 7;
        let err = tokio::spawn(async move { panic!("exit code {code}") })
            .await
            .unwrap_err();
        assert_eq!(panic_message(err), "exit code 7");
    }

    #[test]
    fn empty_report_is_idle() {
        let mut report = DispatchReport::default();
        assert!(report.is_idle());
        report.lost_claims = 1;
        assert!(!report.is_idle());
    }
}
