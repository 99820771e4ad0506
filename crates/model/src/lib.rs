//! Domain Model
//!
//! Records shared by the validator, the stores, the alerting engine and the
//! ingestion coordinator. No I/O lives here.

mod alert;
mod measurement;
mod station;
mod threshold;

pub use alert::{
    ActiveAlertSummary, Alert, AlertFilter, AlertLevel, AlertStatus, LevelCounts, NewAlert,
};
pub use measurement::{Measurement, MeasurementType, NewMeasurement, QualityFlag};
pub use station::{Sensor, Station};
pub use threshold::{NewThreshold, Threshold, ThresholdBounds, ThresholdUpdate};

use thiserror::Error;

/// Primary key type used by every persisted record
pub type DbId = i64;

/// Free-form JSON metadata attached to measurements and alerts
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Error returned when parsing one of the closed string enums fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
