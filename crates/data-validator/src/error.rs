//! Validation Error Types

use chrono::{DateTime, Utc};
use model::{DbId, MeasurementType};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors during measurement or threshold validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value outside a plausibility range
    #[error("{field} value {value} is out of range [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange {
        field: &'static str,
        value: Decimal,
        min: Option<Decimal>,
        max: Option<Decimal>,
    },

    /// Value does not fit the stored decimal precision
    #[error("{field} value {value} exceeds {max_digits} digits with {decimal_places} decimal places")]
    Precision {
        field: &'static str,
        value: Decimal,
        max_digits: u32,
        decimal_places: u32,
    },

    /// Event timestamp later than the server clock allows
    #[error("timestamp {timestamp} is in the future (server time {now})")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Station id does not resolve
    #[error("station {0} does not exist")]
    UnknownStation(DbId),

    /// Sensor id does not resolve
    #[error("sensor {0} does not exist")]
    UnknownSensor(DbId),

    /// Sensor is installed at a different station
    #[error("sensor {sensor_id} belongs to station {sensor_station_id}, not station {station_id}")]
    SensorStationMismatch {
        sensor_id: DbId,
        sensor_station_id: DbId,
        station_id: DbId,
    },

    /// Measurement type differs from the sensor's declared type
    #[error("sensor {sensor_id} measures {expected}, got {actual}")]
    SensorTypeMismatch {
        sensor_id: DbId,
        expected: MeasurementType,
        actual: MeasurementType,
    },

    /// Unit not accepted for this measurement type
    #[error("unit '{unit}' is not accepted for {measurement_type}")]
    UnitNotAllowed {
        unit: String,
        measurement_type: MeasurementType,
    },

    /// Threshold without any bound
    #[error("at least one warning or critical bound must be set")]
    NoBounds,

    /// Two bounds in the wrong order
    #[error("{lower_field} ({lower}) must be {} {upper_field} ({upper})", order_word(.strict))]
    BoundOrder {
        lower_field: &'static str,
        lower: Decimal,
        upper_field: &'static str,
        upper: Decimal,
        strict: bool,
    },

    /// Invalid data format
    #[error("Invalid data format in {field}: {reason}")]
    InvalidFormat { field: &'static str, reason: String },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

fn order_word(strict: &bool) -> &'static str {
    if *strict {
        "less than"
    } else {
        "at most"
    }
}

fn fmt_bound(bound: &Option<Decimal>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

impl ValidationError {
    /// Name of the input field the error refers to
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::OutOfRange { field, .. }
            | ValidationError::Precision { field, .. }
            | ValidationError::InvalidFormat { field, .. } => *field,
            ValidationError::FutureTimestamp { .. } => "timestamp",
            ValidationError::UnknownStation(_) => "station_id",
            ValidationError::UnknownSensor(_) | ValidationError::SensorStationMismatch { .. } => {
                "sensor_id"
            }
            ValidationError::SensorTypeMismatch { .. } => "measurement_type",
            ValidationError::UnitNotAllowed { .. } => "unit",
            ValidationError::NoBounds => "bounds",
            ValidationError::BoundOrder { lower_field, .. } => *lower_field,
            ValidationError::MissingField(field) => *field,
        }
    }
}
