//! Capability registry
//!
//! Capabilities are a closed set registered at startup. Each owns an ordered
//! list of analysis kinds (primary kind first) and a JSON input schema that
//! proposal parameters must satisfy.

use crate::error::ValidationError;
use crate::types::Parameters;
use indexmap::IndexMap;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Registered analysis capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Products running out of stock during the trading day
    StockoutAnalyzer,
    /// Products bought together
    BasketAnalyzer,
    /// Incremental lift of promotions
    PromotionAnalyzer,
    /// Unexplained inventory loss
    ShrinkageAnalyzer,
    /// Sales trends and peak trading hours
    SalesAnalyzer,
}

impl Capability {
    /// Every capability, in registration order
    pub const ALL: [Self; 5] = [
        Self::StockoutAnalyzer,
        Self::BasketAnalyzer,
        Self::PromotionAnalyzer,
        Self::ShrinkageAnalyzer,
        Self::SalesAnalyzer,
    ];

    /// Registered name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StockoutAnalyzer => "StockoutAnalyzer",
            Self::BasketAnalyzer => "BasketAnalyzer",
            Self::PromotionAnalyzer => "PromotionAnalyzer",
            Self::ShrinkageAnalyzer => "ShrinkageAnalyzer",
            Self::SalesAnalyzer => "SalesAnalyzer",
        }
    }

    /// Look up by registered name (case-insensitive)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|cap| cap.name().eq_ignore_ascii_case(name))
    }

    /// Accepted analysis kinds, primary first
    #[must_use]
    pub fn kinds(self) -> &'static [AnalysisKind] {
        match self {
            Self::StockoutAnalyzer => &[AnalysisKind::IntradayStockout],
            Self::BasketAnalyzer => &[AnalysisKind::BasketAffinity],
            Self::PromotionAnalyzer => &[AnalysisKind::PromoLift],
            Self::ShrinkageAnalyzer => &[AnalysisKind::ShrinkAnomaly],
            Self::SalesAnalyzer => &[AnalysisKind::SalesTrend, AnalysisKind::PeakHours],
        }
    }

    /// Kind used when the capability is named explicitly
    #[inline]
    #[must_use]
    pub fn primary_kind(self) -> AnalysisKind {
        self.kinds()[0]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Analysis kind produced by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Intraday stock-outs
    IntradayStockout,
    /// Basket affinity
    BasketAffinity,
    /// Promotion lift
    PromoLift,
    /// Shrink anomalies
    ShrinkAnomaly,
    /// Sales trend
    SalesTrend,
    /// Peak trading hours
    PeakHours,
}

impl AnalysisKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 6] = [
        Self::IntradayStockout,
        Self::BasketAffinity,
        Self::PromoLift,
        Self::ShrinkAnomaly,
        Self::SalesTrend,
        Self::PeakHours,
    ];

    /// Stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntradayStockout => "intraday_stockout",
            Self::BasketAffinity => "basket_affinity",
            Self::PromoLift => "promo_lift",
            Self::ShrinkAnomaly => "shrink_anomaly",
            Self::SalesTrend => "sales_trend",
            Self::PeakHours => "peak_hours",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Capability that executes this kind
    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            Self::IntradayStockout => Capability::StockoutAnalyzer,
            Self::BasketAffinity => Capability::BasketAnalyzer,
            Self::PromoLift => Capability::PromotionAnalyzer,
            Self::ShrinkAnomaly => Capability::ShrinkageAnalyzer,
            Self::SalesTrend | Self::PeakHours => Capability::SalesAnalyzer,
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry
#[derive(Clone)]
pub struct CapabilitySpec {
    /// Capability
    pub capability: Capability,
    /// One-line description
    pub description: &'static str,
    /// Raw input schema
    pub schema: Value,
    compiled: Arc<JSONSchema>,
}

impl std::fmt::Debug for CapabilitySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySpec")
            .field("capability", &self.capability)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl CapabilitySpec {
    /// Compile a spec from its schema
    ///
    /// # Errors
    /// `ValidationError::Schema` if the schema does not compile
    pub fn new(
        capability: Capability,
        description: &'static str,
        schema: Value,
    ) -> Result<Self, ValidationError> {
        let compiled = JSONSchema::compile(&schema).map_err(|e| ValidationError::Schema {
            capability: capability.name().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            capability,
            description,
            schema,
            compiled: Arc::new(compiled),
        })
    }

    /// Check parameters against the input schema
    ///
    /// # Errors
    /// `ValidationError::Parameters` listing every violation
    pub fn validate(&self, parameters: &Parameters) -> Result<(), ValidationError> {
        let instance = Value::Object(parameters.clone());
        let violations: Vec<String> = match self.compiled.validate(&instance) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect(),
        };
        Err(ValidationError::Parameters {
            capability: self.capability.name().to_string(),
            violations,
        })
    }
}

/// Static mapping from capability to kinds and input schema
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    specs: IndexMap<Capability, CapabilitySpec>,
}

impl CapabilityRegistry {
    /// Registry with every built-in capability
    ///
    /// # Errors
    /// `ValidationError::Schema` if a built-in schema fails to compile
    pub fn builtin() -> Result<Self, ValidationError> {
        let mut specs = IndexMap::new();
        for capability in Capability::ALL {
            let (description, schema) = builtin_schema(capability);
            specs.insert(capability, CapabilitySpec::new(capability, description, schema)?);
        }
        Ok(Self { specs })
    }

    /// Resolve a caller-supplied capability name
    ///
    /// # Errors
    /// `ValidationError::UnknownCapability` for unregistered names
    pub fn resolve_name(&self, name: &str) -> Result<Capability, ValidationError> {
        Capability::parse(name)
            .filter(|cap| self.specs.contains_key(cap))
            .ok_or_else(|| ValidationError::UnknownCapability(name.to_string()))
    }

    /// Spec for a capability
    #[inline]
    #[must_use]
    pub fn spec(&self, capability: Capability) -> Option<&CapabilitySpec> {
        self.specs.get(&capability)
    }

    /// Validate parameters for a capability
    ///
    /// # Errors
    /// `ValidationError` when the capability is unregistered or the
    /// parameters violate its schema
    pub fn validate(
        &self,
        capability: Capability,
        parameters: &Parameters,
    ) -> Result<(), ValidationError> {
        self.spec(capability)
            .ok_or_else(|| ValidationError::UnknownCapability(capability.name().to_string()))?
            .validate(parameters)
    }

    /// Registered specs in registration order
    pub fn iter(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.specs.values()
    }

    /// Number of registered capabilities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

fn builtin_schema(capability: Capability) -> (&'static str, Value) {
    let store = json!({ "type": ["string", "integer"], "pattern": "^[0-9]+$", "minimum": 1 });
    let days = json!({ "type": "integer", "minimum": 1, "maximum": 90 });
    let limit = json!({ "type": "integer", "minimum": 1, "maximum": 1000 });

    match capability {
        Capability::StockoutAnalyzer => (
            "Products that run out of stock during the trading day",
            json!({
                "type": "object",
                "properties": { "store": store, "days": days, "limit": limit },
                "required": ["store", "days"],
                "additionalProperties": false
            }),
        ),
        Capability::BasketAnalyzer => (
            "Product pairs frequently bought together",
            json!({
                "type": "object",
                "properties": {
                    "store": store,
                    "days": days,
                    "limit": limit,
                    "min_support": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 }
                },
                "required": ["store", "days"],
                "additionalProperties": false
            }),
        ),
        Capability::PromotionAnalyzer => (
            "Incremental sales lift of a promotion",
            json!({
                "type": "object",
                "properties": {
                    "store": store,
                    "days": days,
                    "limit": limit,
                    "promo_id": { "type": "string", "minLength": 1 }
                },
                "required": ["store", "days", "promo_id"],
                "additionalProperties": false
            }),
        ),
        Capability::ShrinkageAnalyzer => (
            "Unexplained inventory loss by department",
            json!({
                "type": "object",
                "properties": {
                    "store": store,
                    "days": days,
                    "limit": limit,
                    "department": { "type": "string", "minLength": 1 }
                },
                "required": ["store", "days"],
                "additionalProperties": false
            }),
        ),
        Capability::SalesAnalyzer => (
            "Sales trend and peak trading hours",
            json!({
                "type": "object",
                "properties": {
                    "store": store,
                    "days": days,
                    "limit": limit,
                    "granularity": { "enum": ["hour", "day", "week"] }
                },
                "required": ["store", "days"],
                "additionalProperties": false
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn every_kind_belongs_to_a_capability_that_accepts_it() {
        for kind in AnalysisKind::ALL {
            assert!(kind.capability().kinds().contains(&kind));
        }
    }

    #[test]
    fn names_resolve_case_insensitively() {
        let registry = CapabilityRegistry::builtin().unwrap();
        assert_eq!(
            registry.resolve_name("stockoutanalyzer").unwrap(),
            Capability::StockoutAnalyzer
        );
        assert!(matches!(
            registry.resolve_name("WeatherOracle"),
            Err(ValidationError::UnknownCapability(_))
        ));
    }

    #[test]
    fn registry_preserves_registration_order() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let order: Vec<_> = registry.iter().map(|s| s.capability).collect();
        assert_eq!(order, Capability::ALL.to_vec());
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn valid_stockout_parameters_pass() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let p = params(json!({ "store": "28", "days": 14 }));
        assert!(registry.validate(Capability::StockoutAnalyzer, &p).is_ok());
    }

    #[test]
    fn out_of_range_days_are_rejected() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let p = params(json!({ "store": "28", "days": 365 }));
        let err = registry
            .validate(Capability::StockoutAnalyzer, &p)
            .unwrap_err();
        match err {
            ValidationError::Parameters { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("days")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_required_and_unknown_keys_are_rejected() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let p = params(json!({ "store": "28", "days": 7, "colour": "red" }));
        assert!(registry.validate(Capability::PromotionAnalyzer, &p).is_err());
    }

    #[test]
    fn primary_kind_is_first() {
        assert_eq!(
            Capability::SalesAnalyzer.primary_kind(),
            AnalysisKind::SalesTrend
        );
        assert_eq!(
            Capability::StockoutAnalyzer.primary_kind(),
            AnalysisKind::IntradayStockout
        );
    }
}
