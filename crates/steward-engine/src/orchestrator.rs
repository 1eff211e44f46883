//! Orchestrator facade
//!
//! The public surface of the engine. Human-facing operations validate
//! synchronously and return errors; dispatch never does.

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::Result;
use crate::executor::ExecutorSet;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use steward_core::{
    assess_risk, AnalysisResult, AuditEntry, Capability, CapabilityRegistry, Creator,
    ImprovementCycle, NewProposal, Parameters, Proposal, ProposalId, ProposalRequest,
    ProposalStatus, Review, ReviewDecision, ScoreRecord, StewardConfig, ValidationError,
};
use steward_store::SqliteStore;
use tokio::time::MissedTickBehavior;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A proposal with everything recorded about it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalView {
    /// The proposal
    pub proposal: Proposal,
    /// Analysis result, once completed
    pub result: Option<AnalysisResult>,
    /// Rubric score, once completed
    pub score: Option<ScoreRecord>,
    /// Improvement cycle, when this is a remediation proposal
    pub cycle: Option<ImprovementCycle>,
}

/// Approval-gated analysis orchestrator
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: StewardConfig,
    store: SqliteStore,
    registry: CapabilityRegistry,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    /// Orchestrator over an open store
    ///
    /// # Errors
    /// `OrchestratorError::Config` for out-of-range settings, or
    /// `OrchestratorError::Validation` if a built-in schema fails to compile
    pub fn new(config: StewardConfig, store: SqliteStore, executors: ExecutorSet) -> Result<Self> {
        config.validate()?;
        let registry = CapabilityRegistry::builtin()?;
        let dispatcher = Dispatcher::new(&config, store.clone(), registry.clone(), executors);
        Ok(Self {
            config,
            store,
            registry,
            dispatcher,
        })
    }

    /// Open the configured database file and build an orchestrator over it
    ///
    /// # Errors
    /// `OrchestratorError` if the configuration is invalid or the database
    /// cannot be opened
    pub fn open(config: StewardConfig, executors: ExecutorSet) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::open(&config.database_path)?;
        Self::new(config, store, executors)
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Dispatcher driving this orchestrator
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Create a PENDING proposal
    ///
    /// # Errors
    /// `OrchestratorError::Validation` when the creator is blank or
    /// reserved, the capability is unknown, neither capability nor intent is
    /// given, or an explicit capability rejects the parameters
    pub async fn submit_proposal(&self, request: ProposalRequest) -> Result<Proposal> {
        let creator = request.creator.trim();
        if creator.is_empty() || Creator::from_stored(creator).is_system() {
            return Err(ValidationError::InvalidCreator(request.creator.clone()).into());
        }
        let capability = request
            .capability
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| self.registry.resolve_name(name))
            .transpose()?;
        let intent = request
            .intent
            .as_deref()
            .map(str::trim)
            .filter(|intent| !intent.is_empty())
            .map(str::to_string);
        if capability.is_none() && intent.is_none() {
            return Err(ValidationError::MissingTarget.into());
        }
        if let Some(capability) = capability {
            self.registry.validate(capability, &request.parameters)?;
        }

        let risk_level = assess_risk(capability, &request.parameters, &self.config.risk);
        let proposal = self
            .store
            .insert_proposal(NewProposal {
                capability,
                intent,
                parameters: request.parameters,
                creator: Creator::human(creator),
                risk_level,
            })
            .await?;
        tracing::info!(
            proposal_id = %proposal.id,
            target = %proposal.label(),
            creator = %proposal.creator,
            risk = %risk_level,
            "proposal submitted"
        );
        Ok(proposal)
    }

    /// Approve or reject a PENDING proposal
    ///
    /// # Errors
    /// - `OrchestratorError::Validation` for a blank reviewer, a rejection
    ///   without notes, or approving a risk-blocked proposal
    /// - `OrchestratorError::Transition` when the proposal is not PENDING
    /// - `OrchestratorError::NotFound` for unknown ids
    pub async fn review_proposal(&self, id: ProposalId, review: Review) -> Result<Proposal> {
        if review.reviewer.trim().is_empty() {
            return Err(ValidationError::MissingReviewer.into());
        }
        if review.decision == ReviewDecision::Reject && review.trimmed_notes().is_none() {
            return Err(ValidationError::MissingReviewNotes.into());
        }
        let review = Review {
            reviewer: review.reviewer.trim().to_string(),
            ..review
        };
        Ok(self.store.review_proposal(id, review).await?)
    }

    /// Approve a PENDING proposal
    ///
    /// # Errors
    /// See [`Orchestrator::review_proposal`]
    pub async fn approve(
        &self,
        id: ProposalId,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<Proposal> {
        let mut review = Review::approve(reviewer);
        review.notes = notes.map(str::to_string);
        self.review_proposal(id, review).await
    }

    /// Reject a PENDING proposal; notes are mandatory
    ///
    /// # Errors
    /// See [`Orchestrator::review_proposal`]
    pub async fn reject(&self, id: ProposalId, reviewer: &str, notes: &str) -> Result<Proposal> {
        self.review_proposal(id, Review::reject(reviewer, notes)).await
    }

    /// Replace the parameters of a PENDING proposal
    ///
    /// # Errors
    /// - `OrchestratorError::Validation` when the proposal has left PENDING
    ///   or an explicit capability rejects the parameters
    /// - `OrchestratorError::NotFound` for unknown ids
    pub async fn amend_parameters(
        &self,
        id: ProposalId,
        parameters: Parameters,
        actor: &str,
    ) -> Result<Proposal> {
        let current = self.store.get_proposal(id).await?;
        if current.status != ProposalStatus::Pending {
            return Err(ValidationError::ParametersFrozen(current.status).into());
        }
        if let Some(capability) = current.capability {
            self.registry.validate(capability, &parameters)?;
        }
        let risk_level = assess_risk(current.capability, &parameters, &self.config.risk);
        let updated = self
            .store
            .amend_parameters(id, parameters, risk_level, actor.to_string())
            .await?;
        tracing::info!(proposal_id = %id, risk = %risk_level, actor, "parameters amended");
        Ok(updated)
    }

    /// One dispatch pass; never fails
    pub async fn dispatch_once(&self) -> DispatchReport {
        self.dispatcher.run_once().await
    }

    /// A proposal with its result, score and improvement cycle
    ///
    /// # Errors
    /// `OrchestratorError::NotFound` for unknown ids
    pub async fn get_proposal(&self, id: ProposalId) -> Result<ProposalView> {
        let proposal = self.store.get_proposal(id).await?;
        let result = self.store.get_result(id).await?;
        let score = self.store.get_score(id).await?;
        let cycle = self.store.cycle_for_proposal(id).await?;
        Ok(ProposalView {
            proposal,
            result,
            score,
            cycle,
        })
    }

    /// Proposals, optionally filtered by status, oldest first
    ///
    /// # Errors
    /// `OrchestratorError::Store` on database failure
    pub async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        Ok(self.store.list_proposals(status).await?)
    }

    /// Audit entries of one proposal, in order
    ///
    /// # Errors
    /// `OrchestratorError::Store` on database failure
    pub async fn audit_trail(&self, id: ProposalId) -> Result<Vec<AuditEntry>> {
        Ok(self.store.audit_trail(id).await?)
    }

    /// Verify the whole audit chain, returning the number of entries
    ///
    /// # Errors
    /// `OrchestratorError::Store` wrapping an integrity error when the chain
    /// does not verify
    pub async fn verify_audit_chain(&self) -> Result<usize> {
        Ok(self.store.verify_audit_chain().await?)
    }

    /// Improvement cycles, optionally for one capability
    ///
    /// # Errors
    /// `OrchestratorError::Store` on database failure
    pub async fn improvement_cycles(
        &self,
        capability: Option<Capability>,
    ) -> Result<Vec<ImprovementCycle>> {
        Ok(self.store.list_cycles(capability).await?)
    }

    /// Dispatch on the configured interval until `shutdown` resolves.
    ///
    /// A pass in progress finishes before the loop exits.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.config.poll_interval().max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        tracing::info!(
            dispatcher = %self.dispatcher.instance_id(),
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "dispatch loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.dispatch_once().await;
                    for error in &report.errors {
                        tracing::warn!(%error, "dispatch pass reported an error");
                    }
                }
            }
        }
        tracing::info!(dispatcher = %self.dispatcher.instance_id(), "dispatch loop stopped");
    }
}
