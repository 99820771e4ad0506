//! Measurement and Threshold Validator

use chrono::{DateTime, Duration, Utc};
use model::{NewMeasurement, Sensor, Station, ThresholdBounds};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::rules::RuleSet;

/// Total digits of a stored decimal
pub const MAX_DIGITS: u32 = 12;
/// Fractional digits of a stored decimal
pub const DECIMAL_PLACES: u32 = 4;

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Tolerated clock skew for station timestamps (seconds)
    pub max_future_skew_seconds: i64,
    /// Maximum unit string length
    pub max_unit_len: usize,
    /// Plausibility rules per measurement type
    pub rules: RuleSet,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_future_skew_seconds: 0,
            max_unit_len: 20,
            rules: RuleSet::default(),
        }
    }
}

/// Result of validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Whether all values are valid
    pub valid: bool,
    /// List of validation errors
    pub errors: Vec<ValidationError>,
    /// Number of checks run
    pub fields_checked: usize,
}

impl ValidationReport {
    /// Create a valid result
    pub fn valid(fields_checked: usize) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            fields_checked,
        }
    }

    /// Create an invalid result with errors
    pub fn invalid(errors: Vec<ValidationError>) -> Self {
        let fields_checked = errors.len();
        Self {
            valid: false,
            errors,
            fields_checked,
        }
    }

    fn from_checks(errors: Vec<ValidationError>, fields_checked: usize) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            fields_checked,
        }
    }

    /// Convert into a `Result`, keeping the report as the error
    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.valid {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// `(field, message)` pairs for callers that render field-level detail
    pub fn field_errors(&self) -> Vec<(&'static str, String)> {
        self.errors.iter().map(|e| (e.field(), e.to_string())).collect()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Validator for submitted measurements and operator threshold input
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a measurement against its station and sensor.
    ///
    /// `station` and `sensor` are the directory lookups for the ids carried by
    /// the measurement; `None` means the id did not resolve. Every failing check
    /// is reported.
    pub fn validate_measurement(
        &self,
        measurement: &NewMeasurement,
        station: Option<&Station>,
        sensor: Option<&Sensor>,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut checked = 0;

        checked += 1;
        if station.is_none() {
            errors.push(ValidationError::UnknownStation(measurement.station_id));
        }

        checked += 1;
        match sensor {
            None => errors.push(ValidationError::UnknownSensor(measurement.sensor_id)),
            Some(sensor) => {
                if let Err(e) = self.validate_ownership(measurement, sensor) {
                    errors.push(e);
                }
                checked += 1;
                if let Err(e) = self.validate_sensor_type(measurement, sensor) {
                    errors.push(e);
                }
            }
        }

        checked += 1;
        if let Err(e) = self.validate_timestamp(measurement.timestamp, now) {
            errors.push(e);
        }

        checked += 1;
        if let Err(e) = self.validate_unit(&measurement.unit) {
            errors.push(e);
        }

        checked += 1;
        if let Err(e) = self.validate_precision("value", measurement.value) {
            errors.push(e);
        }

        if let Some(raw) = measurement.raw_value {
            checked += 1;
            if let Err(e) = self.validate_precision("raw_value", raw) {
                errors.push(e);
            }
        }

        let rules = self.config.rules.rules_for(measurement.measurement_type);
        checked += rules.len();
        errors.extend(self.config.rules.check(measurement));

        if !errors.is_empty() {
            debug!(
                station_id = measurement.station_id,
                sensor_id = measurement.sensor_id,
                errors = errors.len(),
                "Measurement rejected by validation"
            );
        }

        ValidationReport::from_checks(errors, checked)
    }

    /// The sensor must be installed at the measurement's station
    pub fn validate_ownership(
        &self,
        measurement: &NewMeasurement,
        sensor: &Sensor,
    ) -> Result<(), ValidationError> {
        if sensor.station_id != measurement.station_id {
            Err(ValidationError::SensorStationMismatch {
                sensor_id: sensor.id,
                sensor_station_id: sensor.station_id,
                station_id: measurement.station_id,
            })
        } else {
            Ok(())
        }
    }

    /// A typed sensor only produces its own measurement type
    pub fn validate_sensor_type(
        &self,
        measurement: &NewMeasurement,
        sensor: &Sensor,
    ) -> Result<(), ValidationError> {
        match sensor.sensor_type {
            Some(expected) if expected != measurement.measurement_type => {
                Err(ValidationError::SensorTypeMismatch {
                    sensor_id: sensor.id,
                    expected,
                    actual: measurement.measurement_type,
                })
            }
            _ => Ok(()),
        }
    }

    /// Timestamps later than `now` plus the configured skew are rejected
    pub fn validate_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let latest = now + Duration::seconds(self.config.max_future_skew_seconds);
        if timestamp > latest {
            Err(ValidationError::FutureTimestamp { timestamp, now })
        } else {
            Ok(())
        }
    }

    /// Validate the unit string
    pub fn validate_unit(&self, unit: &str) -> Result<(), ValidationError> {
        if unit.trim().is_empty() {
            return Err(ValidationError::MissingField("unit"));
        }
        if unit.chars().count() > self.config.max_unit_len {
            return Err(ValidationError::InvalidFormat {
                field: "unit",
                reason: format!("longer than {} characters", self.config.max_unit_len),
            });
        }
        Ok(())
    }

    /// The value must fit DECIMAL(12,4)
    pub fn validate_precision(
        &self,
        field: &'static str,
        value: Decimal,
    ) -> Result<(), ValidationError> {
        let integer_limit = Decimal::from(10i64.pow(MAX_DIGITS - DECIMAL_PLACES));
        if value.normalize().scale() > DECIMAL_PLACES || value.abs() >= integer_limit {
            Err(ValidationError::Precision {
                field,
                value,
                max_digits: MAX_DIGITS,
                decimal_places: DECIMAL_PLACES,
            })
        } else {
            Ok(())
        }
    }

    /// Validate operator-supplied threshold bounds
    pub fn validate_threshold(&self, bounds: &ThresholdBounds, unit: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut checked = 1;

        if bounds.is_empty() {
            errors.push(ValidationError::NoBounds);
        }

        for (field, bound) in bounds.named() {
            if let Some(b) = bound {
                checked += 1;
                if let Err(e) = self.validate_precision(field, b) {
                    errors.push(e);
                }
            }
        }

        let pairs = [
            ("warning_min", bounds.warning_min, "warning_max", bounds.warning_max, true),
            ("critical_min", bounds.critical_min, "critical_max", bounds.critical_max, true),
            ("critical_min", bounds.critical_min, "warning_min", bounds.warning_min, false),
            ("warning_max", bounds.warning_max, "critical_max", bounds.critical_max, false),
        ];
        for (lower_field, lower, upper_field, upper, strict) in pairs {
            if let (Some(lower), Some(upper)) = (lower, upper) {
                checked += 1;
                let ordered = if strict { lower < upper } else { lower <= upper };
                if !ordered {
                    errors.push(ValidationError::BoundOrder {
                        lower_field,
                        lower,
                        upper_field,
                        upper,
                        strict,
                    });
                }
            }
        }

        checked += 1;
        if let Err(e) = self.validate_unit(unit) {
            errors.push(e);
        }

        ValidationReport::from_checks(errors, checked)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
