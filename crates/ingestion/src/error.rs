//! Ingestion Error Types

use chrono::{DateTime, Utc};
use data_validator::ValidationReport;
use model::DbId;
use storage::StorageError;
use thiserror::Error;

/// Errors from the ingestion entry points
#[derive(Debug, Error)]
pub enum IngestError {
    /// Rejected before persistence
    #[error("validation failed: {0}")]
    Validation(ValidationReport),

    #[error("measurement for station {station_id}, sensor {sensor_id} at {timestamp} already exists")]
    DuplicateMeasurement {
        station_id: DbId,
        sensor_id: DbId,
        timestamp: DateTime<Utc>,
    },

    /// The measurement is stored but its alert evaluation did not complete.
    /// Retry with `Coordinator::reevaluate`.
    #[error("alert evaluation failed for measurement {measurement_id}: {source}")]
    Evaluation {
        measurement_id: DbId,
        #[source]
        source: StorageError,
    },

    #[error("batch of {len} measurements exceeds the limit of {limit}")]
    BatchTooLarge { len: usize, limit: usize },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error(transparent)]
    Storage(StorageError),
}

impl IngestError {
    /// Stable error kind used in batch reports and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::DuplicateMeasurement { .. } => "duplicate_measurement",
            IngestError::Evaluation { .. } => "evaluation",
            IngestError::BatchTooLarge { .. } => "batch_too_large",
            IngestError::NotFound { .. } => "not_found",
            IngestError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::DuplicateMeasurement {
                station_id,
                sensor_id,
                timestamp,
            } => IngestError::DuplicateMeasurement {
                station_id,
                sensor_id,
                timestamp,
            },
            StorageError::NotFound { entity, id } => IngestError::NotFound { entity, id },
            other => IngestError::Storage(other),
        }
    }
}
