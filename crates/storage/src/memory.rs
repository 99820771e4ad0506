//! In-memory Store

use crate::{
    AlertInsert, AlertStore, MeasurementStore, RecordOutcome, StationDirectory, StorageError,
    ThresholdStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    Alert, AlertFilter, AlertLevel, AlertStatus, DbId, Measurement, MeasurementType, NewAlert,
    NewMeasurement, NewThreshold, Sensor, Station, Threshold, ThresholdUpdate,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Default)]
struct Tables {
    stations: HashMap<DbId, Station>,
    sensors: HashMap<DbId, Sensor>,
    measurements: BTreeMap<DbId, Measurement>,
    /// (station_id, sensor_id, timestamp)
    measurement_keys: HashSet<(DbId, DbId, DateTime<Utc>)>,
    thresholds: BTreeMap<DbId, Threshold>,
    alerts: BTreeMap<DbId, Alert>,
    next_measurement_id: DbId,
    next_threshold_id: DbId,
    next_alert_id: DbId,
}

impl Tables {
    fn active_alert(&self, station_id: DbId, threshold_id: DbId) -> Option<&Alert> {
        self.alerts.values().find(|a| {
            a.station_id == station_id && a.threshold_id == threshold_id && a.is_active()
        })
    }

    /// Same constraints as the SQLite schema: one alert per measurement and
    /// one active alert per (station, threshold)
    fn insert_alert_guarded(&mut self, new: NewAlert) -> AlertInsert {
        if let Some(existing) = self
            .alerts
            .values()
            .find(|a| a.measurement_id == new.measurement_id)
        {
            debug!(
                measurement_id = new.measurement_id,
                alert_id = existing.id,
                "Measurement already has an alert"
            );
            return AlertInsert::Suppressed {
                existing: existing.clone(),
            };
        }

        if let Some(existing) = self.active_alert(new.station_id, new.threshold_id) {
            debug!(
                station_id = new.station_id,
                threshold_id = new.threshold_id,
                alert_id = existing.id,
                within_window = existing.triggered_at >= new.suppress_since,
                "Active alert already covers this threshold"
            );
            return AlertInsert::Suppressed {
                existing: existing.clone(),
            };
        }

        self.next_alert_id += 1;
        let alert = Alert::from_new(self.next_alert_id, new);
        self.alerts.insert(alert.id, alert.clone());
        AlertInsert::Created(alert)
    }
}

/// Store keeping every table in process memory.
///
/// One mutex covers all tables, so each trait call is atomic.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        info!("Creating in-memory store");
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }

    /// Number of stored measurements
    pub fn measurement_count(&self) -> usize {
        self.tables.lock().map(|t| t.measurements.len()).unwrap_or(0)
    }

    /// Number of stored alerts
    pub fn alert_count(&self) -> usize {
        self.tables.lock().map(|t| t.alerts.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StationDirectory for MemoryStore {
    async fn get_station(&self, id: DbId) -> Result<Option<Station>, StorageError> {
        Ok(self.tables()?.stations.get(&id).cloned())
    }

    async fn get_sensor(&self, id: DbId) -> Result<Option<Sensor>, StorageError> {
        Ok(self.tables()?.sensors.get(&id).cloned())
    }

    async fn put_station(&self, station: Station) -> Result<(), StorageError> {
        self.tables()?.stations.insert(station.id, station);
        Ok(())
    }

    async fn put_sensor(&self, sensor: Sensor) -> Result<(), StorageError> {
        self.tables()?.sensors.insert(sensor.id, sensor);
        Ok(())
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn record_measurement(
        &self,
        new: NewMeasurement,
        received_at: DateTime<Utc>,
        alert: Option<NewAlert>,
    ) -> Result<RecordOutcome, StorageError> {
        let mut tables = self.tables()?;

        let key = (new.station_id, new.sensor_id, new.timestamp);
        if tables.measurement_keys.contains(&key) {
            return Err(StorageError::DuplicateMeasurement {
                station_id: new.station_id,
                sensor_id: new.sensor_id,
                timestamp: new.timestamp,
            });
        }

        tables.next_measurement_id += 1;
        let measurement = Measurement::from_new(tables.next_measurement_id, new, received_at);
        tables.measurement_keys.insert(key);
        tables.measurements.insert(measurement.id, measurement.clone());

        let alert = match alert {
            Some(mut new_alert) => {
                new_alert.measurement_id = measurement.id;
                tables.insert_alert_guarded(new_alert)
            }
            None => AlertInsert::NotRequested,
        };

        Ok(RecordOutcome { measurement, alert })
    }

    async fn get_measurement(&self, id: DbId) -> Result<Option<Measurement>, StorageError> {
        Ok(self.tables()?.measurements.get(&id).cloned())
    }

    async fn list_measurements(
        &self,
        station_id: DbId,
        limit: usize,
    ) -> Result<Vec<Measurement>, StorageError> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .measurements
            .values()
            .filter(|m| m.station_id == station_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl ThresholdStore for MemoryStore {
    async fn find_threshold(
        &self,
        station_id: DbId,
        measurement_type: MeasurementType,
    ) -> Result<Option<Threshold>, StorageError> {
        Ok(self
            .tables()?
            .thresholds
            .values()
            .find(|t| t.station_id == station_id && t.measurement_type == measurement_type)
            .cloned())
    }

    async fn get_threshold(&self, id: DbId) -> Result<Option<Threshold>, StorageError> {
        Ok(self.tables()?.thresholds.get(&id).cloned())
    }

    async fn list_thresholds(
        &self,
        station_id: Option<DbId>,
    ) -> Result<Vec<Threshold>, StorageError> {
        Ok(self
            .tables()?
            .thresholds
            .values()
            .filter(|t| station_id.map_or(true, |s| t.station_id == s))
            .cloned()
            .collect())
    }

    async fn insert_threshold(
        &self,
        new: NewThreshold,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError> {
        let mut tables = self.tables()?;
        if tables
            .thresholds
            .values()
            .any(|t| t.station_id == new.station_id && t.measurement_type == new.measurement_type)
        {
            return Err(StorageError::DuplicateConfiguration {
                station_id: new.station_id,
                measurement_type: new.measurement_type,
            });
        }

        tables.next_threshold_id += 1;
        let threshold = Threshold {
            id: tables.next_threshold_id,
            station_id: new.station_id,
            measurement_type: new.measurement_type,
            bounds: new.bounds,
            unit: new.unit,
            is_active: new.is_active,
            created_by: Some(actor.to_string()),
            updated_by: Some(actor.to_string()),
            created_at: now,
            updated_at: now,
            notes: new.notes,
        };
        tables.thresholds.insert(threshold.id, threshold.clone());
        Ok(threshold)
    }

    async fn update_threshold(
        &self,
        id: DbId,
        update: ThresholdUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError> {
        let mut tables = self.tables()?;
        let threshold = tables
            .thresholds
            .get_mut(&id)
            .ok_or(StorageError::NotFound {
                entity: "threshold",
                id,
            })?;
        threshold.bounds = update.bounds;
        threshold.unit = update.unit;
        threshold.is_active = update.is_active;
        threshold.notes = update.notes;
        threshold.updated_by = Some(actor.to_string());
        threshold.updated_at = now;
        Ok(threshold.clone())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn attach_alert(&self, new: NewAlert) -> Result<AlertInsert, StorageError> {
        let mut tables = self.tables()?;
        if !tables.measurements.contains_key(&new.measurement_id) {
            return Err(StorageError::NotFound {
                entity: "measurement",
                id: new.measurement_id,
            });
        }
        Ok(tables.insert_alert_guarded(new))
    }

    async fn get_alert(&self, id: DbId) -> Result<Option<Alert>, StorageError> {
        Ok(self.tables()?.alerts.get(&id).cloned())
    }

    async fn find_active_alert(
        &self,
        station_id: DbId,
        threshold_id: DbId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Alert>, StorageError> {
        let tables = self.tables()?;
        Ok(tables
            .active_alert(station_id, threshold_id)
            .filter(|a| since.map_or(true, |s| a.triggered_at >= s))
            .cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.triggered_at
                .cmp(&a.triggered_at)
                .then(b.id.cmp(&a.id))
        });
        rows.truncate(filter.effective_limit());
        Ok(rows)
    }

    async fn active_alert_counts(&self) -> Result<Vec<(DbId, AlertLevel, u64)>, StorageError> {
        let tables = self.tables()?;
        let mut counts: BTreeMap<(DbId, AlertLevel), u64> = BTreeMap::new();
        for alert in tables.alerts.values().filter(|a| a.is_active()) {
            *counts.entry((alert.station_id, alert.level)).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((station_id, level), n)| (station_id, level, n))
            .collect())
    }

    async fn compare_and_update_alert(
        &self,
        expected: AlertStatus,
        alert: &Alert,
    ) -> Result<bool, StorageError> {
        let mut tables = self.tables()?;
        match tables.alerts.get_mut(&alert.id) {
            Some(stored) if stored.status == expected => {
                *stored = alert.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound {
                entity: "alert",
                id: alert.id,
            }),
        }
    }
}
