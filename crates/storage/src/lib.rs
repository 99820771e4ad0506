//! Storage Layer
//!
//! The `Store` contract used by the alerting engine, with an in-memory
//! implementation and a SQLite implementation behind the same traits.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    Alert, AlertFilter, AlertLevel, AlertStatus, DbId, Measurement, MeasurementType,
    NewAlert, NewMeasurement, NewThreshold, Sensor, Station, Threshold, ThresholdUpdate,
};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },
    #[error("measurement for station {station_id}, sensor {sensor_id} at {timestamp} already exists")]
    DuplicateMeasurement {
        station_id: DbId,
        sensor_id: DbId,
        timestamp: DateTime<Utc>,
    },
    #[error("a threshold for station {station_id} and {measurement_type} already exists")]
    DuplicateConfiguration {
        station_id: DbId,
        measurement_type: MeasurementType,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Result of a guarded alert insert
#[derive(Debug, Clone, PartialEq)]
pub enum AlertInsert {
    /// A new alert was stored
    Created(Alert),
    /// An alert already covers this condition; nothing was stored
    Suppressed { existing: Alert },
    /// No alert was requested
    NotRequested,
}

/// Outcome of `MeasurementStore::record_measurement`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub measurement: Measurement,
    pub alert: AlertInsert,
}

/// Station and sensor lookup
#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn get_station(&self, id: DbId) -> Result<Option<Station>, StorageError>;

    async fn get_sensor(&self, id: DbId) -> Result<Option<Sensor>, StorageError>;

    /// Insert or replace a station
    async fn put_station(&self, station: Station) -> Result<(), StorageError>;

    /// Insert or replace a sensor
    async fn put_sensor(&self, sensor: Sensor) -> Result<(), StorageError>;
}

/// Measurement persistence
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Persist a measurement and, optionally, its alert as one unit of work.
    ///
    /// The alert insert is guarded: an active alert for the same
    /// `(station_id, threshold_id)` triggered at or after `suppress_since`, or
    /// any active alert for the key, yields `AlertInsert::Suppressed`. The
    /// alert's `measurement_id` is replaced by the new measurement's id.
    async fn record_measurement(
        &self,
        new: NewMeasurement,
        received_at: DateTime<Utc>,
        alert: Option<NewAlert>,
    ) -> Result<RecordOutcome, StorageError>;

    async fn get_measurement(&self, id: DbId) -> Result<Option<Measurement>, StorageError>;

    /// Most recent measurements of a station, newest event time first
    async fn list_measurements(
        &self,
        station_id: DbId,
        limit: usize,
    ) -> Result<Vec<Measurement>, StorageError>;
}

/// Threshold persistence
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    /// Threshold for the key regardless of its active flag
    async fn find_threshold(
        &self,
        station_id: DbId,
        measurement_type: MeasurementType,
    ) -> Result<Option<Threshold>, StorageError>;

    async fn get_threshold(&self, id: DbId) -> Result<Option<Threshold>, StorageError>;

    async fn list_thresholds(&self, station_id: Option<DbId>)
        -> Result<Vec<Threshold>, StorageError>;

    /// Fails with `DuplicateConfiguration` when the key is taken
    async fn insert_threshold(
        &self,
        new: NewThreshold,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError>;

    async fn update_threshold(
        &self,
        id: DbId,
        update: ThresholdUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError>;
}

/// Alert persistence
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Guarded insert for an already persisted measurement
    async fn attach_alert(&self, new: NewAlert) -> Result<AlertInsert, StorageError>;

    async fn get_alert(&self, id: DbId) -> Result<Option<Alert>, StorageError>;

    /// Active alert for the key, optionally only if triggered at or after `since`
    async fn find_active_alert(
        &self,
        station_id: DbId,
        threshold_id: DbId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Alert>, StorageError>;

    /// Alerts matching the filter, newest `triggered_at` first
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError>;

    /// `(station_id, level, count)` over alerts with `status = active`
    async fn active_alert_counts(&self) -> Result<Vec<(DbId, AlertLevel, u64)>, StorageError>;

    /// Write `alert` only if the stored status still equals `expected`.
    /// Returns whether the write happened.
    async fn compare_and_update_alert(
        &self,
        expected: AlertStatus,
        alert: &Alert,
    ) -> Result<bool, StorageError>;
}

/// Everything the engine needs from persistence
pub trait Store: StationDirectory + MeasurementStore + ThresholdStore + AlertStore {}

impl<T> Store for T where T: StationDirectory + MeasurementStore + ThresholdStore + AlertStore {}
