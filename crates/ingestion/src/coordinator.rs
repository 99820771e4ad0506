//! Ingestion Coordinator Implementation

use alerting::{draft_alert, find_breach, AlertConfig, DedupGuard, Reading, ThresholdRegistry};
use chrono::{DateTime, Utc};
use data_validator::{RuleSet, ValidationConfig, ValidationReport, Validator};
use metrics::counter;
use model::{Alert, DbId, Measurement, NewAlert, NewMeasurement, Station};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{AlertInsert, AlertStore, MeasurementStore, StationDirectory, StorageError, Store};
use tracing::{debug, error, info, warn};

use crate::batch::{BatchEntry, BatchItemError, BatchReport};
use crate::error::IngestError;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum measurements per batch call
    pub batch_limit: usize,
    /// Tolerated clock skew for station timestamps (seconds)
    pub max_future_skew_seconds: i64,
    /// Plausibility rules per measurement type
    pub rules: RuleSet,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1000,
            max_future_skew_seconds: 0,
            rules: RuleSet::default(),
        }
    }
}

/// What alert evaluation decided for one measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertDecision {
    /// No active threshold for the station and type
    NoThreshold,
    /// The station has automatic alerts switched off
    AlertsDisabled,
    /// The value is within bounds
    Normal,
    Created(Alert),
    /// An active alert already covers the breach
    Suppressed { existing_alert_id: DbId },
}

impl AlertDecision {
    pub fn created_alert(&self) -> Option<&Alert> {
        match self {
            AlertDecision::Created(alert) => Some(alert),
            _ => None,
        }
    }
}

/// A stored measurement and its alert decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingested {
    pub measurement: Measurement,
    pub decision: AlertDecision,
}

enum Plan {
    Skip(AlertDecision),
    Raise(NewAlert),
}

/// Runs validate → persist → lookup → classify → guard → create
pub struct Coordinator {
    store: Arc<dyn Store>,
    registry: ThresholdRegistry,
    validator: Validator,
    guard: DedupGuard,
    config: IngestConfig,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, config: IngestConfig, alerting: &AlertConfig) -> Self {
        let validator = Validator::new(ValidationConfig {
            max_future_skew_seconds: config.max_future_skew_seconds,
            rules: config.rules.clone(),
            ..Default::default()
        });
        info!(
            batch_limit = config.batch_limit,
            lookback_minutes = alerting.lookback_minutes,
            "Creating ingestion coordinator"
        );
        Self {
            registry: ThresholdRegistry::new(Arc::clone(&store)),
            store,
            validator,
            guard: alerting.guard(),
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one measurement received at `now`
    pub async fn ingest_at(
        &self,
        new: NewMeasurement,
        now: DateTime<Utc>,
    ) -> Result<Ingested, IngestError> {
        let result = self.ingest_one(new, now).await;
        match &result {
            Ok(_) => counter!("measurements_ingested_total").increment(1),
            Err(e) => counter!("measurements_rejected_total", "reason" => e.kind()).increment(1),
        }
        result
    }

    /// Ingest one submitted entry received now
    pub async fn ingest_entry(&self, entry: BatchEntry) -> Result<Ingested, IngestError> {
        self.ingest_entry_at(entry, Utc::now()).await
    }

    /// Ingest a decoded measurement, or count and report why it could not be
    /// decoded
    pub async fn ingest_entry_at(
        &self,
        entry: BatchEntry,
        now: DateTime<Utc>,
    ) -> Result<Ingested, IngestError> {
        match entry {
            Ok(new) => self.ingest_at(new, now).await,
            Err(e) => {
                let error = IngestError::Validation(ValidationReport::invalid(vec![e]));
                counter!("measurements_rejected_total", "reason" => error.kind()).increment(1);
                Err(error)
            }
        }
    }

    async fn ingest_one(
        &self,
        new: NewMeasurement,
        now: DateTime<Utc>,
    ) -> Result<Ingested, IngestError> {
        let station = self.store.get_station(new.station_id).await?;
        let sensor = self.store.get_sensor(new.sensor_id).await?;

        let report = self
            .validator
            .validate_measurement(&new, station.as_ref(), sensor.as_ref(), now);
        if !report.valid {
            return Err(IngestError::Validation(report));
        }
        if let Some(sensor) = sensor.as_ref().filter(|s| !s.is_active) {
            warn!(
                sensor_id = sensor.id,
                station_id = new.station_id,
                "Accepting measurement from inactive sensor"
            );
        }

        let plan = self
            .plan(Reading::pending(&new), station.as_ref(), now)
            .await?;
        let (request, skipped) = match plan {
            Plan::Raise(alert) => (Some(alert), AlertDecision::Normal),
            Plan::Skip(decision) => (None, decision),
        };

        let outcome = self.store.record_measurement(new, now, request).await?;
        let decision = self.settle(outcome.alert, skipped);
        debug!(
            measurement_id = outcome.measurement.id,
            station_id = outcome.measurement.station_id,
            "Measurement ingested"
        );

        Ok(Ingested {
            measurement: outcome.measurement,
            decision,
        })
    }

    /// Ingest a list item by item. A failing item is reported and the batch
    /// continues; each item is its own unit of work.
    pub async fn ingest_batch_at(
        &self,
        items: Vec<NewMeasurement>,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, IngestError> {
        self.ingest_entries_at(items.into_iter().map(Ok).collect(), now)
            .await
    }

    /// Ingest submitted entries received now
    pub async fn ingest_entries(&self, entries: Vec<BatchEntry>) -> Result<BatchReport, IngestError> {
        self.ingest_entries_at(entries, Utc::now()).await
    }

    /// Ingest submitted entries item by item. Entries that failed to decode
    /// are reported at their position like any other rejected item.
    pub async fn ingest_entries_at(
        &self,
        entries: Vec<BatchEntry>,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, IngestError> {
        let limit = self.config.batch_limit;
        if entries.len() > limit {
            warn!(len = entries.len(), limit, "Batch rejected: too many measurements");
            return Err(IngestError::BatchTooLarge {
                len: entries.len(),
                limit,
            });
        }

        let mut report = BatchReport::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match self.ingest_entry_at(entry, now).await {
                Ok(ingested) => {
                    report.created_count += 1;
                    if ingested.decision.created_alert().is_some() {
                        report.alerts_created += 1;
                    }
                }
                Err(e) => {
                    debug!(index, kind = e.kind(), "Batch item rejected: {}", e);
                    report.errors.push(BatchItemError::new(index, &e));
                }
            }
        }

        info!(
            created = report.created_count,
            failed = report.failed_count(),
            alerts = report.alerts_created,
            "Batch ingested"
        );
        Ok(report)
    }

    /// Re-run alert evaluation for a stored measurement now
    pub async fn reevaluate(&self, measurement_id: DbId) -> Result<Ingested, IngestError> {
        self.reevaluate_at(measurement_id, Utc::now()).await
    }

    /// Re-run alert evaluation for a stored measurement.
    ///
    /// Safe to repeat: a measurement never gets a second alert.
    pub async fn reevaluate_at(
        &self,
        measurement_id: DbId,
        now: DateTime<Utc>,
    ) -> Result<Ingested, IngestError> {
        let measurement = self
            .store
            .get_measurement(measurement_id)
            .await?
            .ok_or(IngestError::NotFound {
                entity: "measurement",
                id: measurement_id,
            })?;

        let decision = self
            .evaluate_stored(&measurement, now)
            .await
            .map_err(|source| {
                error!(measurement_id, error = %source, "Alert evaluation failed");
                IngestError::Evaluation {
                    measurement_id,
                    source,
                }
            })?;

        Ok(Ingested {
            measurement,
            decision,
        })
    }

    async fn evaluate_stored(
        &self,
        measurement: &Measurement,
        now: DateTime<Utc>,
    ) -> Result<AlertDecision, StorageError> {
        let station = self.store.get_station(measurement.station_id).await?;
        match self
            .plan(Reading::from(measurement), station.as_ref(), now)
            .await?
        {
            Plan::Skip(decision) => Ok(decision),
            Plan::Raise(alert) => {
                let insert = self.store.attach_alert(alert).await?;
                Ok(self.settle(insert, AlertDecision::Normal))
            }
        }
    }

    async fn plan(
        &self,
        reading: Reading<'_>,
        station: Option<&Station>,
        now: DateTime<Utc>,
    ) -> Result<Plan, StorageError> {
        if station.is_some_and(|s| !s.auto_alerts_enabled) {
            return Ok(Plan::Skip(AlertDecision::AlertsDisabled));
        }

        let Some(threshold) = self
            .registry
            .lookup(reading.station_id, reading.measurement_type)
            .await?
        else {
            return Ok(Plan::Skip(AlertDecision::NoThreshold));
        };

        let Some(breach) = find_breach(reading.value, &threshold.bounds) else {
            return Ok(Plan::Skip(AlertDecision::Normal));
        };

        debug!(
            station_id = reading.station_id,
            threshold_id = threshold.id,
            bound = breach.bound,
            level = %breach.level(),
            "Threshold breached"
        );
        Ok(Plan::Raise(draft_alert(
            reading,
            &threshold,
            station,
            &breach,
            now,
            self.guard.window_start(now),
        )))
    }

    fn settle(&self, insert: AlertInsert, not_requested: AlertDecision) -> AlertDecision {
        match insert {
            AlertInsert::Created(alert) => {
                info!(
                    alert_id = alert.id,
                    station_id = alert.station_id,
                    threshold_id = alert.threshold_id,
                    level = %alert.level,
                    "Alert created"
                );
                counter!("alerts_created_total", "level" => alert.level.as_str()).increment(1);
                AlertDecision::Created(alert)
            }
            AlertInsert::Suppressed { existing } => {
                debug!(
                    alert_id = existing.id,
                    station_id = existing.station_id,
                    threshold_id = existing.threshold_id,
                    "Duplicate alert suppressed"
                );
                counter!("alerts_suppressed_total").increment(1);
                AlertDecision::Suppressed {
                    existing_alert_id: existing.id,
                }
            }
            AlertInsert::NotRequested => not_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_serializes_with_outcome_tag() {
        let suppressed = AlertDecision::Suppressed {
            existing_alert_id: 12,
        };
        assert_eq!(
            serde_json::to_value(&suppressed).unwrap(),
            json!({"outcome": "suppressed", "existing_alert_id": 12})
        );
        assert_eq!(
            serde_json::to_value(AlertDecision::NoThreshold).unwrap(),
            json!({"outcome": "no_threshold"})
        );
        assert!(suppressed.created_alert().is_none());
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: IngestConfig = serde_json::from_value(json!({"batch_limit": 50})).unwrap();
        assert_eq!(config.batch_limit, 50);
        assert_eq!(config.max_future_skew_seconds, 0);
        assert!(!config.rules.rules_for(model::MeasurementType::Ph).is_empty());
    }
}
