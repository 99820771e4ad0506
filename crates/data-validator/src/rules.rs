//! Plausibility Rules
//!
//! Per-measurement-type rules are plain data (`#[serde(tag = "rule")]`) so they
//! can be loaded from configuration, and are interpreted by `ValueRule::check`.

use model::{MeasurementType, NewMeasurement};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ValidationError;

/// A single plausibility rule applied to a submitted measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValueRule {
    /// Inclusive range; either side may be open
    Range {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
    /// Value must be zero or positive
    NonNegative,
    /// At most `places` fractional digits
    MaxScale { places: u32 },
    /// Unit must be one of `units` (exact match)
    UnitIn { units: Vec<String> },
}

impl ValueRule {
    /// Check a measurement against this rule
    pub fn check(&self, measurement: &NewMeasurement) -> Result<(), ValidationError> {
        let value = measurement.value;
        match self {
            ValueRule::Range { min, max } => {
                let below = min.is_some_and(|m| value < m);
                let above = max.is_some_and(|m| value > m);
                if below || above {
                    return Err(ValidationError::OutOfRange {
                        field: "value",
                        value,
                        min: *min,
                        max: *max,
                    });
                }
            }
            ValueRule::NonNegative => {
                if value.is_sign_negative() && !value.is_zero() {
                    return Err(ValidationError::OutOfRange {
                        field: "value",
                        value,
                        min: Some(Decimal::ZERO),
                        max: None,
                    });
                }
            }
            ValueRule::MaxScale { places } => {
                if value.normalize().scale() > *places {
                    return Err(ValidationError::InvalidFormat {
                        field: "value",
                        reason: format!("more than {} decimal places", places),
                    });
                }
            }
            ValueRule::UnitIn { units } => {
                if !units.iter().any(|u| u == &measurement.unit) {
                    return Err(ValidationError::UnitNotAllowed {
                        unit: measurement.unit.clone(),
                        measurement_type: measurement.measurement_type,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Rules keyed by measurement type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: HashMap<MeasurementType, Vec<ValueRule>>,
}

impl RuleSet {
    /// A rule set with no rules
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Add a rule for one measurement type
    pub fn with_rule(mut self, measurement_type: MeasurementType, rule: ValueRule) -> Self {
        self.rules.entry(measurement_type).or_default().push(rule);
        self
    }

    pub fn rules_for(&self, measurement_type: MeasurementType) -> &[ValueRule] {
        self.rules
            .get(&measurement_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run every rule for the measurement's type, collecting all failures
    pub fn check(&self, measurement: &NewMeasurement) -> Vec<ValidationError> {
        self.rules_for(measurement.measurement_type)
            .iter()
            .filter_map(|rule| rule.check(measurement).err())
            .collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet::empty()
            .with_rule(
                MeasurementType::Ph,
                ValueRule::Range {
                    min: Some(Decimal::ZERO),
                    max: Some(Decimal::from(14)),
                },
            )
            .with_rule(MeasurementType::FlowRate, ValueRule::NonNegative)
            .with_rule(MeasurementType::Rainfall, ValueRule::NonNegative)
    }
}
