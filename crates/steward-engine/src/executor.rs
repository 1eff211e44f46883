//! Analysis executor contract
//!
//! Executors are black boxes: `(kind, parameters) -> AnalysisOutput`. The
//! engine only depends on this trait. Every capability must have one,
//! enforced when the [`ExecutorSet`] is built.

use crate::error::{ExecutorError, ExecutorSetError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::{AnalysisKind, AnalysisOutput, Capability, Parameters};

/// Runs one kind of analysis
///
/// Implement this trait to plug a data source into the dispatcher.
#[async_trait::async_trait]
pub trait AnalysisExecutor: Send + Sync {
    /// Execute `kind` with validated parameters
    async fn execute(
        &self,
        kind: AnalysisKind,
        parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError>;
}

/// One executor per capability, complete by construction
#[derive(Clone)]
pub struct ExecutorSet {
    executors: Arc<HashMap<Capability, Arc<dyn AnalysisExecutor>>>,
}

impl std::fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.executors.keys().copied().collect();
        registered.sort();
        f.debug_struct("ExecutorSet")
            .field("registered", &registered)
            .finish()
    }
}

impl ExecutorSet {
    /// Start registering executors
    #[must_use]
    pub fn builder() -> ExecutorSetBuilder {
        ExecutorSetBuilder::default()
    }

    /// The same executor for every capability
    #[must_use]
    pub fn uniform(executor: Arc<dyn AnalysisExecutor>) -> Self {
        let executors = Capability::ALL
            .into_iter()
            .map(|cap| (cap, Arc::clone(&executor)))
            .collect();
        Self {
            executors: Arc::new(executors),
        }
    }

    /// Executor for a capability
    #[must_use]
    pub fn get(&self, capability: Capability) -> Option<Arc<dyn AnalysisExecutor>> {
        self.executors.get(&capability).cloned()
    }
}

/// Builder for [`ExecutorSet`]
#[derive(Default)]
pub struct ExecutorSetBuilder {
    executors: HashMap<Capability, Arc<dyn AnalysisExecutor>>,
}

impl ExecutorSetBuilder {
    /// Register the executor of a capability, replacing any earlier one
    #[must_use]
    pub fn register(mut self, capability: Capability, executor: Arc<dyn AnalysisExecutor>) -> Self {
        self.executors.insert(capability, executor);
        self
    }

    /// Finish the set
    ///
    /// # Errors
    /// `ExecutorSetError::Missing` naming every capability left uncovered
    pub fn build(self) -> Result<ExecutorSet, ExecutorSetError> {
        let missing: Vec<Capability> = Capability::ALL
            .into_iter()
            .filter(|cap| !self.executors.contains_key(cap))
            .collect();
        if !missing.is_empty() {
            return Err(ExecutorSetError::Missing(missing));
        }
        Ok(ExecutorSet {
            executors: Arc::new(self.executors),
        })
    }
}

/// Serves canned outputs from `<dir>/<kind>.json`
///
/// Stands in for the aggregation layer when running the CLI against
/// recorded results.
#[derive(Debug, Clone)]
pub struct ReplayExecutor {
    dir: PathBuf,
}

impl ReplayExecutor {
    /// Replay from a directory
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File consulted for a kind
    #[must_use]
    pub fn path_for(&self, kind: AnalysisKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.as_str()))
    }
}

#[async_trait::async_trait]
impl AnalysisExecutor for ReplayExecutor {
    async fn execute(
        &self,
        kind: AnalysisKind,
        _parameters: &Parameters,
    ) -> Result<AnalysisOutput, ExecutorError> {
        let path = self.path_for(kind);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExecutorError::UnsupportedKind(kind))
            }
            Err(e) => {
                return Err(ExecutorError::Unavailable(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&text)
            .map_err(|e| ExecutorError::InvalidOutput(format!("{}: {e}", path.display())))
    }
}
