//! Threshold Evaluator
//!
//! Pure classification of a value against a threshold's bounds. Precedence:
//! critical before warning, min before max. Comparisons are strict, so a value
//! equal to a bound is inside it.

use model::{AlertLevel, Threshold, ThresholdBounds};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of evaluating a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    Warning,
    Critical,
}

impl Classification {
    /// Alert level for a breach; `None` for normal values
    pub fn alert_level(self) -> Option<AlertLevel> {
        match self {
            Classification::Normal => None,
            Classification::Warning => Some(AlertLevel::Warning),
            Classification::Critical => Some(AlertLevel::Critical),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Warning => "warning",
            Classification::Critical => "critical",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The bound a value crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breach {
    /// Never `Normal`
    pub classification: Classification,
    /// Field name of the crossed bound, e.g. `critical_max`
    pub bound: &'static str,
    pub limit: Decimal,
}

impl Breach {
    pub fn level(&self) -> AlertLevel {
        match self.classification {
            Classification::Critical => AlertLevel::Critical,
            _ => AlertLevel::Warning,
        }
    }

    /// Short human description such as `above maximum 30`
    pub fn describe(&self) -> String {
        let direction = if self.bound.ends_with("_min") {
            "below minimum"
        } else {
            "above maximum"
        };
        format!("{} {}", direction, self.limit)
    }
}

/// First bound crossed by `value`, in evaluation order
pub fn find_breach(value: Decimal, bounds: &ThresholdBounds) -> Option<Breach> {
    let checks = [
        ("critical_min", bounds.critical_min, Classification::Critical, true),
        ("critical_max", bounds.critical_max, Classification::Critical, false),
        ("warning_min", bounds.warning_min, Classification::Warning, true),
        ("warning_max", bounds.warning_max, Classification::Warning, false),
    ];

    checks
        .into_iter()
        .find_map(|(bound, limit, classification, is_min)| {
            let limit = limit?;
            let crossed = if is_min { value < limit } else { value > limit };
            crossed.then_some(Breach {
                classification,
                bound,
                limit,
            })
        })
}

/// Classify a value against bare bounds
pub fn classify_bounds(value: Decimal, bounds: &ThresholdBounds) -> Classification {
    find_breach(value, bounds).map_or(Classification::Normal, |b| b.classification)
}

/// Classify a value against a threshold
pub fn classify(value: Decimal, threshold: &Threshold) -> Classification {
    classify_bounds(value, &threshold.bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let bounds = ThresholdBounds {
            warning_max: Some(d("25")),
            ..Default::default()
        };
        assert_eq!(classify_bounds(d("25"), &bounds), Classification::Normal);
        assert_eq!(classify_bounds(d("25.0001"), &bounds), Classification::Warning);
        assert_eq!(classify_bounds(d("26"), &bounds), Classification::Warning);
    }

    #[test]
    fn test_critical_dominates_warning() {
        let bounds = ThresholdBounds {
            warning_min: Some(d("6.5")),
            critical_min: Some(d("6")),
            ..Default::default()
        };
        assert_eq!(classify_bounds(d("6.2"), &bounds), Classification::Warning);
        assert_eq!(classify_bounds(d("5.9"), &bounds), Classification::Critical);
        assert_eq!(classify_bounds(d("6"), &bounds), Classification::Warning);
        assert_eq!(classify_bounds(d("6.5"), &bounds), Classification::Normal);
    }

    #[test]
    fn test_unset_bounds_never_trigger() {
        let bounds = ThresholdBounds::default();
        assert_eq!(classify_bounds(d("-1000000"), &bounds), Classification::Normal);
        assert_eq!(classify_bounds(d("1000000"), &bounds), Classification::Normal);
    }

    #[test]
    fn test_breach_reports_bound() {
        let bounds = ThresholdBounds {
            critical_max: Some(d("30")),
            warning_max: Some(d("25")),
            ..Default::default()
        };
        let breach = find_breach(d("35"), &bounds).unwrap();
        assert_eq!(breach.bound, "critical_max");
        assert_eq!(breach.level(), AlertLevel::Critical);
        assert_eq!(breach.describe(), "above maximum 30");

        let breach = find_breach(d("27"), &bounds).unwrap();
        assert_eq!(breach.bound, "warning_max");
        assert_eq!(breach.level(), AlertLevel::Warning);
    }

    #[test]
    fn test_alert_level_mapping() {
        assert_eq!(Classification::Normal.alert_level(), None);
        assert_eq!(Classification::Warning.alert_level(), Some(AlertLevel::Warning));
        assert_eq!(Classification::Critical.alert_level(), Some(AlertLevel::Critical));
    }
}
