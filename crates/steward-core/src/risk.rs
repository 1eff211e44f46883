//! Submit-time risk assessment

use crate::capability::Capability;
use crate::config::RiskConfig;
use crate::types::{param_i64, Parameters, RiskLevel};

/// Days assumed when a proposal omits `days`
pub const DEFAULT_DAYS: i64 = 7;
/// Row limit assumed when a proposal omits `limit`
pub const DEFAULT_LIMIT: i64 = 100;

/// Assess the scan a proposal would run.
///
/// Intent-only proposals stay `Unassessed` until routing names a capability.
#[must_use]
pub fn assess_risk(
    capability: Option<Capability>,
    parameters: &Parameters,
    config: &RiskConfig,
) -> RiskLevel {
    if capability.is_none() {
        return RiskLevel::Unassessed;
    }
    let days = param_i64(parameters, "days").unwrap_or(DEFAULT_DAYS);
    let limit = param_i64(parameters, "limit").unwrap_or(DEFAULT_LIMIT);
    let scan = days.saturating_mul(limit);

    if scan > config.block_above {
        RiskLevel::Blocked
    } else if scan > config.high_above {
        RiskLevel::High
    } else if days > config.medium_days {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
