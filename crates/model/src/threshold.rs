//! Threshold configuration records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DbId, MeasurementType};

fn default_true() -> bool {
    true
}

/// The four optional bounds of a threshold. An unset bound never triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdBounds {
    #[serde(default)]
    pub warning_min: Option<Decimal>,
    #[serde(default)]
    pub warning_max: Option<Decimal>,
    #[serde(default)]
    pub critical_min: Option<Decimal>,
    #[serde(default)]
    pub critical_max: Option<Decimal>,
}

impl ThresholdBounds {
    pub fn is_empty(&self) -> bool {
        self.warning_min.is_none()
            && self.warning_max.is_none()
            && self.critical_min.is_none()
            && self.critical_max.is_none()
    }

    /// Bounds paired with their field names, in evaluation order
    pub fn named(&self) -> [(&'static str, Option<Decimal>); 4] {
        [
            ("critical_min", self.critical_min),
            ("critical_max", self.critical_max),
            ("warning_min", self.warning_min),
            ("warning_max", self.warning_max),
        ]
    }
}

/// Active configuration for one (station, measurement type) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub id: DbId,
    pub station_id: DbId,
    pub measurement_type: MeasurementType,
    #[serde(flatten)]
    pub bounds: ThresholdBounds,
    pub unit: String,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub notes: String,
}

/// Operator input for a new threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThreshold {
    pub station_id: DbId,
    pub measurement_type: MeasurementType,
    #[serde(flatten)]
    pub bounds: ThresholdBounds,
    pub unit: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: String,
}

impl NewThreshold {
    pub fn new(
        station_id: DbId,
        measurement_type: MeasurementType,
        bounds: ThresholdBounds,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            station_id,
            measurement_type,
            bounds,
            unit: unit.into(),
            is_active: true,
            notes: String::new(),
        }
    }
}

/// Full replacement of the mutable part of a threshold. The key is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    #[serde(flatten)]
    pub bounds: ThresholdBounds,
    pub unit: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: String,
}

impl ThresholdUpdate {
    /// Start an update from the threshold's current values
    pub fn from_current(threshold: &Threshold) -> Self {
        Self {
            bounds: threshold.bounds,
            unit: threshold.unit.clone(),
            is_active: threshold.is_active,
            notes: threshold.notes.clone(),
        }
    }
}
