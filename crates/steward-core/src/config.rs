//! Steward configuration
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! its default. `STEWARD_DB` overrides the database path.

use crate::capability::AnalysisKind;
use crate::error::ConfigError;
use crate::rubric::{Dimension, GradeThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`StewardConfig::database_path`]
pub const DATABASE_ENV: &str = "STEWARD_DB";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Seconds between dispatch cycles in the polling loop
    pub poll_interval_secs: u64,
    /// Upper bound on a single executor call
    pub executor_timeout_secs: u64,
    /// Age after which a RUNNING claim is reaped; defaults to twice the
    /// executor timeout
    pub claim_ttl_secs: Option<u64>,
    /// Intent routing
    pub router: RouterConfig,
    /// Rubric scoring
    pub rubric: RubricConfig,
    /// Self-improvement trigger
    pub improvement: ImprovementConfig,
    /// Risk thresholds
    pub risk: RiskConfig,
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("steward.db"),
            poll_interval_secs: 30,
            executor_timeout_secs: 300,
            claim_ttl_secs: None,
            router: RouterConfig::default(),
            rubric: RubricConfig::default(),
            improvement: ImprovementConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl StewardConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file, apply environment overrides and validate
    ///
    /// # Errors
    /// `ConfigError` if the file cannot be read or parsed, or a value is
    /// out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?.with_env_overrides();
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse TOML text without environment overrides
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `STEWARD_DB` if set
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        match std::env::var_os(DATABASE_ENV) {
            Some(path) if !path.is_empty() => self.with_database_path(PathBuf::from(path)),
            _ => self,
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be positive"));
        }
        if self.executor_timeout_secs == 0 {
            return Err(invalid("executor_timeout_secs", "must be positive"));
        }
        if let Some(ttl) = self.claim_ttl_secs {
            // a live claim must never look stale to another dispatcher
            if ttl <= self.executor_timeout_secs {
                return Err(invalid(
                    "claim_ttl_secs",
                    "must exceed executor_timeout_secs",
                ));
            }
        }
        if self.rubric.dimensions.is_empty() {
            return Err(invalid("rubric.dimensions", "at least one dimension is required"));
        }
        let t = &self.rubric.thresholds;
        if !(0.0..=10.0).contains(&t.exec_ready) || !(t.exec_ready..=10.0).contains(&t.board_ready)
        {
            return Err(invalid(
                "rubric.thresholds",
                "need 0 <= exec_ready <= board_ready <= 10",
            ));
        }
        let imp = &self.improvement;
        if imp.trigger_every == 0 {
            return Err(invalid("improvement.trigger_every", "must be positive"));
        }
        if imp.score_window == 0 {
            return Err(invalid("improvement.score_window", "must be positive"));
        }
        if imp.window_days == 0 {
            return Err(invalid("improvement.window_days", "must be positive"));
        }
        if !imp.min_delta.is_finite() || imp.min_delta < 0.0 {
            return Err(invalid("improvement.min_delta", "must be a non-negative number"));
        }
        if self.risk.high_above > self.risk.block_above {
            return Err(invalid("risk.high_above", "must not exceed risk.block_above"));
        }
        Ok(())
    }

    /// With database path
    #[inline]
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// With executor timeout
    #[inline]
    #[must_use]
    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With claim TTL
    #[inline]
    #[must_use]
    pub fn with_claim_ttl_secs(mut self, secs: u64) -> Self {
        self.claim_ttl_secs = Some(secs);
        self
    }

    /// With router fallback kind
    #[inline]
    #[must_use]
    pub fn with_fallback_kind(mut self, kind: AnalysisKind) -> Self {
        self.router.fallback_kind = kind;
        self
    }

    /// With rubric dimensions
    #[inline]
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.rubric.dimensions = dimensions;
        self
    }

    /// With improvement settings
    #[inline]
    #[must_use]
    pub fn with_improvement(mut self, improvement: ImprovementConfig) -> Self {
        self.improvement = improvement;
        self
    }

    /// With risk thresholds
    #[inline]
    #[must_use]
    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    /// Poll interval as a duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Executor timeout as a duration
    #[must_use]
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    /// Effective claim TTL
    #[must_use]
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(
            self.claim_ttl_secs
                .unwrap_or_else(|| self.executor_timeout_secs.saturating_mul(2)),
        )
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

/// Intent routing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Kind used when no keyword matches
    pub fallback_kind: AnalysisKind,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fallback_kind: AnalysisKind::SalesTrend,
        }
    }
}

/// Rubric settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RubricConfig {
    /// Dimensions applied to every result
    pub dimensions: Vec<Dimension>,
    /// Grade band thresholds
    pub thresholds: GradeThresholds,
}

impl Default for RubricConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimension::ALL.to_vec(),
            thresholds: GradeThresholds::default(),
        }
    }
}

/// Self-improvement settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementConfig {
    /// Evaluate after every Nth completion of a capability
    pub trigger_every: u64,
    /// Number of recent scores considered
    pub score_window: usize,
    /// Improvement needed for a cycle to succeed
    pub min_delta: f64,
    /// Length of the attempt-counting window
    pub window_days: u32,
    /// Weakest mean at or above this needs no remediation
    pub target_score: f64,
    /// Fewest scores needed before evaluating
    pub min_scores: usize,
}

impl Default for ImprovementConfig {
    fn default() -> Self {
        Self {
            trigger_every: 5,
            score_window: 10,
            min_delta: 0.3,
            window_days: 7,
            target_score: 8.0,
            min_scores: 1,
        }
    }
}

/// Risk thresholds on the requested scan size (`days * limit`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Windows longer than this many days are at least medium risk
    pub medium_days: i64,
    /// Scans above this are high risk
    pub high_above: i64,
    /// Scans above this are blocked
    pub block_above: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            medium_days: 30,
            high_above: 20_000,
            block_above: 60_000,
        }
    }
}
