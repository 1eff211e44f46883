//! Testing utilities for the Steward workspace
//!
//! Shared fixtures: sample analysis outputs, scripted executors and
//! orchestrator builders.

#![allow(missing_docs)]

use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use steward_core::{
    AnalysisKind, AnalysisOutput, EvidenceTable, Finding, Impact, Parameters, ProposalId,
    ProposalRequest, StewardConfig,
};
use steward_engine::{AnalysisExecutor, ExecutorError, ExecutorSet, Orchestrator};
use steward_store::SqliteStore;

// -----------------------------------------------------------------------------
// Outputs
// -----------------------------------------------------------------------------

/// A complete, concise report that scores 10 on every dimension
pub fn sample_output(kind: AnalysisKind) -> AnalysisOutput {
    AnalysisOutput {
        title: format!("{} report for store 28", kind.as_str().replace('_', " ")),
        executive_summary: "Milk and bread run out by mid afternoon on weekdays, costing an \
            estimated four hundred dollars a week in lost sales across the dairy aisle."
            .to_string(),
        findings: vec![
            Finding::new("Milk is empty from 15:00 on weekdays")
                .with_evidence("on-hand hits zero at 15:10 on 9 of 10 days")
                .with_recommendation("add a 13:00 replenishment run"),
            Finding::new("Bread is empty from 17:00").with_recommendation("raise the par level"),
        ],
        evidence: vec![EvidenceTable {
            name: "hourly on-hand".to_string(),
            headers: vec!["hour".to_string(), "units".to_string()],
            rows: vec![vec![json!(14), json!(6)], vec![json!(15), json!(0)]],
        }],
        impact: Some(Impact {
            estimate: 400.0,
            unit: "USD/week".to_string(),
            basis: "lost units times margin".to_string(),
        }),
        methodology: "hourly on-hand reconstructed from POS and receipts".to_string(),
        confidence: 0.8,
        data_sources: vec!["pos".to_string(), "receiving".to_string()],
    }
}

/// A report whose narrative rambles on, dragging brevity well below target
pub fn rambling_output(kind: AnalysisKind) -> AnalysisOutput {
    let mut output = sample_output(kind);
    output.executive_summary = vec!["sales"; 60].join(" ");
    output.findings = (0..6)
        .map(|i| {
            Finding::new(format!("finding {i}: {}", vec!["detail"; 80].join(" ")))
                .with_recommendation("review")
        })
        .collect();
    output
}

/// Request for the stock-out scenario used throughout the tests
pub fn stockout_request() -> ProposalRequest {
    ProposalRequest::for_capability("StockoutAnalyzer")
        .with_param("store", "28")
        .with_param("days", 14)
        .created_by("dana")
}

// -----------------------------------------------------------------------------
// Executors
// -----------------------------------------------------------------------------

/// Returns [`sample_output`] for whatever kind it is asked for
#[derive(Debug, Clone, Default)]
pub struct SampleExecutor;

#[async_trait::async_trait]
impl AnalysisExecutor for SampleExecutor {
    async fn execute(
        &self,
        kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        Ok(sample_output(kind))
    }
}

/// Always returns the same output
#[derive(Debug, Clone)]
pub struct StaticExecutor {
    pub output: AnalysisOutput,
}

impl StaticExecutor {
    pub fn new(output: AnalysisOutput) -> Self {
        Self { output }
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for StaticExecutor {
    async fn execute(
        &self,
        _kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        Ok(self.output.clone())
    }
}

/// Always fails with the given message
#[derive(Debug, Clone)]
pub struct FailingExecutor {
    pub message: String,
}

impl FailingExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for FailingExecutor {
    async fn execute(
        &self,
        _kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        Err(ExecutorError::Failed(self.message.clone()))
    }
}

/// Sleeps before answering
#[derive(Debug, Clone)]
pub struct SlowExecutor {
    pub delay: Duration,
}

impl SlowExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for SlowExecutor {
    async fn execute(
        &self,
        kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        tokio::time::sleep(self.delay).await;
        Ok(sample_output(kind))
    }
}

/// Panics on every call
#[derive(Debug, Clone)]
pub struct PanickingExecutor {
    pub message: &'static str,
}

#[async_trait::async_trait]
impl AnalysisExecutor for PanickingExecutor {
    async fn execute(
        &self,
        _kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        panic!("{}", self.message)
    }
}

/// Records the parameters of every call
#[derive(Debug, Default)]
pub struct CountingExecutor {
    calls: Mutex<Vec<Parameters>>,
    delay: Duration,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Yield for `delay` inside every call so concurrent passes interleave
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn calls(&self) -> Vec<Parameters> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for CountingExecutor {
    async fn execute(
        &self,
        kind: AnalysisKind,
        parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        self.calls.lock().push(parameters.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(sample_output(kind))
    }
}

/// Answers from a queue; falls back to [`sample_output`] once drained
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<AnalysisOutput, ExecutorError>>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = Result<AnalysisOutput, ExecutorError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(sample_output(kind)))
    }
}

// -----------------------------------------------------------------------------
// Orchestrators
// -----------------------------------------------------------------------------

/// Configuration tuned for tests: short timeout, default everything else
pub fn test_config() -> StewardConfig {
    StewardConfig::new()
        .with_executor_timeout(Duration::from_secs(1))
        .with_poll_interval_secs(1)
}

/// In-memory orchestrator with one executor for every capability
pub fn orchestrator(executor: Arc<dyn AnalysisExecutor>) -> Orchestrator {
    orchestrator_with(test_config(), executor)
}

/// In-memory orchestrator with a custom configuration
pub fn orchestrator_with(config: StewardConfig, executor: Arc<dyn AnalysisExecutor>) -> Orchestrator {
    let store = SqliteStore::in_memory().unwrap();
    Orchestrator::new(config, store, ExecutorSet::uniform(executor)).unwrap()
}

/// File-backed orchestrator; each call opens its own store handle
pub fn file_orchestrator(
    path: &Path,
    config: StewardConfig,
    executor: Arc<dyn AnalysisExecutor>,
) -> Orchestrator {
    let store = SqliteStore::open(path).unwrap();
    Orchestrator::new(config, store, ExecutorSet::uniform(executor)).unwrap()
}

/// Submit and approve a request
pub async fn submit_approved(orchestrator: &Orchestrator, request: ProposalRequest) -> ProposalId {
    let proposal = orchestrator.submit_proposal(request).await.unwrap();
    orchestrator
        .approve(proposal.id, "lee", None)
        .await
        .unwrap();
    proposal.id
}
