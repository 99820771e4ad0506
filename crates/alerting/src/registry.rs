//! Threshold Registry

use chrono::{DateTime, Utc};
use data_validator::{ValidationError, ValidationReport, Validator};
use model::{DbId, MeasurementType, NewThreshold, Threshold, ThresholdUpdate};
use std::sync::Arc;
use storage::{StationDirectory, StorageError, Store, ThresholdStore};
use thiserror::Error;
use tracing::info;

/// Threshold registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid threshold: {0}")]
    Validation(ValidationReport),
    #[error("threshold {0} not found")]
    NotFound(DbId),
    #[error("a threshold for station {station_id} and {measurement_type} already exists")]
    DuplicateConfiguration {
        station_id: DbId,
        measurement_type: MeasurementType,
    },
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for RegistryError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::DuplicateConfiguration {
                station_id,
                measurement_type,
            } => RegistryError::DuplicateConfiguration {
                station_id,
                measurement_type,
            },
            StorageError::NotFound {
                entity: "threshold",
                id,
            } => RegistryError::NotFound(id),
            other => RegistryError::Storage(other),
        }
    }
}

/// One threshold per (station, measurement type)
pub struct ThresholdRegistry {
    store: Arc<dyn Store>,
    validator: Validator,
}

impl ThresholdRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_validator(store, Validator::default())
    }

    pub fn with_validator(store: Arc<dyn Store>, validator: Validator) -> Self {
        Self { store, validator }
    }

    /// Active threshold for the key. Inactive and missing look the same.
    pub async fn lookup(
        &self,
        station_id: DbId,
        measurement_type: MeasurementType,
    ) -> Result<Option<Threshold>, StorageError> {
        Ok(self
            .store
            .find_threshold(station_id, measurement_type)
            .await?
            .filter(|t| t.is_active))
    }

    pub async fn get(&self, id: DbId) -> Result<Threshold, RegistryError> {
        self.store
            .get_threshold(id)
            .await?
            .ok_or(RegistryError::NotFound(id))
    }

    pub async fn list(&self, station_id: Option<DbId>) -> Result<Vec<Threshold>, RegistryError> {
        Ok(self.store.list_thresholds(station_id).await?)
    }

    pub async fn create(&self, new: NewThreshold, actor: &str) -> Result<Threshold, RegistryError> {
        self.create_at(new, actor, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        new: NewThreshold,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, RegistryError> {
        let mut report = self.validator.validate_threshold(&new.bounds, &new.unit);
        if self.store.get_station(new.station_id).await?.is_none() {
            report.valid = false;
            report
                .errors
                .insert(0, ValidationError::UnknownStation(new.station_id));
        }
        report.into_result().map_err(RegistryError::Validation)?;

        let threshold = self.store.insert_threshold(new, actor, now).await?;
        info!(
            threshold_id = threshold.id,
            station_id = threshold.station_id,
            measurement_type = %threshold.measurement_type,
            actor,
            "Threshold created"
        );
        Ok(threshold)
    }

    pub async fn update(
        &self,
        id: DbId,
        update: ThresholdUpdate,
        actor: &str,
    ) -> Result<Threshold, RegistryError> {
        self.update_at(id, update, actor, Utc::now()).await
    }

    pub async fn update_at(
        &self,
        id: DbId,
        update: ThresholdUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, RegistryError> {
        self.validator
            .validate_threshold(&update.bounds, &update.unit)
            .into_result()
            .map_err(RegistryError::Validation)?;

        let threshold = self.store.update_threshold(id, update, actor, now).await?;
        info!(
            threshold_id = id,
            is_active = threshold.is_active,
            actor,
            "Threshold updated"
        );
        Ok(threshold)
    }

    /// Activate or deactivate a threshold. Existing alerts are not touched.
    pub async fn set_active(
        &self,
        id: DbId,
        active: bool,
        actor: &str,
    ) -> Result<Threshold, RegistryError> {
        let current = self.get(id).await?;
        let mut update = ThresholdUpdate::from_current(&current);
        update.is_active = active;
        self.update(id, update, actor).await
    }
}
