//! Batch ingestion report

use data_validator::ValidationError;
use model::NewMeasurement;
use serde::Serialize;
use serde_json::Value;

use crate::error::IngestError;

/// A submitted batch item: decoded, or the reason it could not be
pub type BatchEntry = Result<NewMeasurement, ValidationError>;

const MEASUREMENT_FIELDS: [&str; 9] = [
    "station_id",
    "sensor_id",
    "measurement_type",
    "value",
    "raw_value",
    "unit",
    "quality_flag",
    "timestamp",
    "metadata",
];

/// Decode one submitted JSON object into a measurement. A decode failure is a
/// field-level validation error naming the offending field when serde does.
pub fn decode_measurement(value: Value) -> BatchEntry {
    serde_json::from_value(value).map_err(|e| {
        let reason = e.to_string();
        let field = MEASUREMENT_FIELDS
            .iter()
            .copied()
            .find(|f| reason.contains(&format!("`{}`", f)))
            .unwrap_or("measurement");
        ValidationError::InvalidFormat { field, reason }
    })
}

/// One field-level problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Failure of one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemError {
    /// 0-based position in the submitted list
    pub index: usize,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl BatchItemError {
    pub fn new(index: usize, error: &IngestError) -> Self {
        let fields = match error {
            IngestError::Validation(report) => report
                .field_errors()
                .into_iter()
                .map(|(field, message)| FieldError { field, message })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            index,
            kind: error.kind(),
            message: error.to_string(),
            fields,
        }
    }
}

/// Outcome of a batch submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Measurements persisted
    pub created_count: usize,
    /// Alerts raised by those measurements
    pub alerts_created: usize,
    pub errors: Vec<BatchItemError>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.errors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_validator::ValidationReport;
    use serde_json::json;

    #[test]
    fn test_decode_names_missing_field() {
        let err = decode_measurement(json!({
            "station_id": 1,
            "sensor_id": 10,
            "measurement_type": "temperature",
            "value": "21.5",
            "timestamp": "2024-05-01T12:00:00Z",
        }))
        .unwrap_err();
        assert_eq!(err.field(), "unit");
    }

    #[test]
    fn test_decode_falls_back_to_measurement_field() {
        let err = decode_measurement(json!({
            "station_id": 1,
            "sensor_id": 10,
            "measurement_type": "salinity",
            "value": "21.5",
            "unit": "C",
            "timestamp": "2024-05-01T12:00:00Z",
        }))
        .unwrap_err();
        assert_eq!(err.field(), "measurement");

        let ok = decode_measurement(json!({
            "station_id": 1,
            "sensor_id": 10,
            "measurement_type": "temperature",
            "value": 21.5,
            "unit": "C",
            "timestamp": "2024-05-01T12:00:00Z",
        }))
        .unwrap();
        assert_eq!(ok.unit, "C");
    }

    #[test]
    fn test_validation_item_lists_fields() {
        let report = ValidationReport::invalid(vec![
            ValidationError::UnknownStation(4),
            ValidationError::UnknownSensor(9),
        ]);
        let item = BatchItemError::new(2, &IngestError::Validation(report));

        assert_eq!(item.index, 2);
        assert_eq!(item.kind, "validation");
        let fields: Vec<_> = item.fields.iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["station_id", "sensor_id"]);
    }

    #[test]
    fn test_other_errors_have_no_fields() {
        let error = IngestError::NotFound {
            entity: "measurement",
            id: 3,
        };
        let item = BatchItemError::new(0, &error);

        assert_eq!(item.kind, "not_found");
        assert!(item.fields.is_empty());
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("fields").is_none());
    }
}
