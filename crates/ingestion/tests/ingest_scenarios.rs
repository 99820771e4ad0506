//! End-to-end ingestion scenarios against both store implementations

use alerting::{ActionOutcome, AlertAction, AlertConfig, AlertManager, ThresholdRegistry};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ingestion::{decode_measurement, AlertDecision, Coordinator, IngestConfig, IngestError};
use model::{
    AlertFilter, AlertLevel, AlertStatus, DbId, MeasurementType, NewMeasurement, NewThreshold,
    Sensor, Station, ThresholdBounds,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use storage::{MeasurementStore, MemoryStore, SqliteStore, StationDirectory, Store};

const BRIDGE: DbId = 1;
const CREEK: DbId = 2;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

struct Harness {
    store: Arc<dyn Store>,
    coordinator: Coordinator,
    registry: ThresholdRegistry,
    alerts: AlertManager,
}

impl Harness {
    async fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, IngestConfig::default()).await
    }

    async fn with_config(store: Arc<dyn Store>, config: IngestConfig) -> Self {
        store
            .put_station(Station::new(BRIDGE, "Rio Claro Bridge", "RC-01"))
            .await
            .unwrap();
        store
            .put_station(Station::new(CREEK, "Quebrada Honda", "QH-02"))
            .await
            .unwrap();
        let sensors = [
            (10, BRIDGE, MeasurementType::Temperature, "C"),
            (11, BRIDGE, MeasurementType::Ph, "pH"),
            (20, CREEK, MeasurementType::Ph, "pH"),
        ];
        for (id, station_id, kind, unit) in sensors {
            store
                .put_sensor(Sensor::new(id, station_id, kind, unit))
                .await
                .unwrap();
        }

        let alert_config = AlertConfig::default();
        Self {
            coordinator: Coordinator::new(Arc::clone(&store), config, &alert_config),
            registry: ThresholdRegistry::new(Arc::clone(&store)),
            alerts: AlertManager::new(Arc::clone(&store), alert_config),
            store,
        }
    }

    async fn threshold(&self, station_id: DbId, kind: MeasurementType, bounds: ThresholdBounds) -> DbId {
        let unit = if kind == MeasurementType::Ph { "pH" } else { "C" };
        self.registry
            .create_at(NewThreshold::new(station_id, kind, bounds, unit), "ops", t0())
            .await
            .unwrap()
            .id
    }

    async fn alerts_for(&self, station_id: DbId) -> Vec<model::Alert> {
        let filter = AlertFilter {
            station_id: Some(station_id),
            ..Default::default()
        };
        self.alerts.list(&filter).await.unwrap()
    }
}

fn temperature(value: &str, at: DateTime<Utc>) -> NewMeasurement {
    NewMeasurement {
        station_id: BRIDGE,
        sensor_id: 10,
        measurement_type: MeasurementType::Temperature,
        value: d(value),
        raw_value: None,
        unit: "C".into(),
        quality_flag: Default::default(),
        timestamp: at,
        metadata: Default::default(),
    }
}

fn ph(station_id: DbId, sensor_id: DbId, value: &str, at: DateTime<Utc>) -> NewMeasurement {
    NewMeasurement {
        station_id,
        sensor_id,
        measurement_type: MeasurementType::Ph,
        unit: "pH".into(),
        ..temperature(value, at)
    }
}

fn critical_max_30() -> ThresholdBounds {
    ThresholdBounds {
        critical_max: Some(d("30")),
        ..Default::default()
    }
}

async fn memory() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

async fn sqlite() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

async fn suppress_then_resolve_then_alert_again(store: Arc<dyn Store>) {
    let h = Harness::new(store).await;
    let threshold_id = h
        .threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;

    let first = h.coordinator.ingest_at(temperature("35", t0()), t0()).await.unwrap();
    let AlertDecision::Created(alert) = first.decision else {
        panic!("expected an alert, got {:?}", first.decision);
    };
    assert_eq!(alert.level, AlertLevel::Critical);
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.threshold_id, threshold_id);
    assert_eq!(alert.measurement_id, first.measurement.id);
    assert_eq!(alert.title, "Critical threshold exceeded at Rio Claro Bridge");

    let t1 = t0() + Duration::minutes(1);
    let second = h.coordinator.ingest_at(temperature("36", t1), t1).await.unwrap();
    assert_eq!(
        second.decision,
        AlertDecision::Suppressed {
            existing_alert_id: alert.id
        }
    );

    let t2 = t0() + Duration::minutes(2);
    let resolved = h
        .alerts
        .apply_at(alert.id, AlertAction::Resolve, "ana", Some("sensor shaded"), t2)
        .await
        .unwrap();
    let ActionOutcome::Applied(resolved) = resolved else {
        panic!("resolve should apply");
    };
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_at, Some(t2));

    let t3 = t0() + Duration::minutes(3);
    let third = h.coordinator.ingest_at(temperature("37", t3), t3).await.unwrap();
    let AlertDecision::Created(new_alert) = third.decision else {
        panic!("expected a new alert after resolve");
    };
    assert_ne!(new_alert.id, alert.id);
    assert_eq!(h.alerts_for(BRIDGE).await.len(), 2);
}

#[tokio::test]
async fn test_temperature_scenario_memory() {
    suppress_then_resolve_then_alert_again(memory().await).await;
}

#[tokio::test]
async fn test_temperature_scenario_sqlite() {
    suppress_then_resolve_then_alert_again(sqlite().await).await;
}

async fn ph_tiers(store: Arc<dyn Store>) {
    let h = Harness::new(store).await;
    let bounds = ThresholdBounds {
        warning_min: Some(d("6.5")),
        critical_min: Some(d("6")),
        ..Default::default()
    };
    h.threshold(BRIDGE, MeasurementType::Ph, bounds).await;
    h.threshold(CREEK, MeasurementType::Ph, bounds).await;

    let warning = h
        .coordinator
        .ingest_at(ph(BRIDGE, 11, "6.2", t0()), t0())
        .await
        .unwrap();
    assert_eq!(
        warning.decision.created_alert().map(|a| a.level),
        Some(AlertLevel::Warning)
    );

    let critical = h
        .coordinator
        .ingest_at(ph(CREEK, 20, "5.9", t0()), t0())
        .await
        .unwrap();
    let alert = critical.decision.created_alert().unwrap();
    assert_eq!(alert.level, AlertLevel::Critical);
    assert_eq!(
        alert.message,
        "Value 5.9 pH of pH exceeded the configured critical threshold (below minimum 6)."
    );
}

#[tokio::test]
async fn test_ph_tiers_memory() {
    ph_tiers(memory().await).await;
}

#[tokio::test]
async fn test_ph_tiers_sqlite() {
    ph_tiers(sqlite().await).await;
}

async fn batch_with_duplicate(store: Arc<dyn Store>) {
    let h = Harness::new(store).await;
    let batch = vec![
        temperature("20", t0()),
        temperature("21", t0()),
        temperature("22", t0() + Duration::seconds(30)),
    ];

    let report = h.coordinator.ingest_batch_at(batch, t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.created_count, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].index, 1);
    assert_eq!(report.errors[0].kind, "duplicate_measurement");
    assert_eq!(h.store.list_measurements(BRIDGE, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_with_duplicate_memory() {
    batch_with_duplicate(memory().await).await;
}

#[tokio::test]
async fn test_batch_with_duplicate_sqlite() {
    batch_with_duplicate(sqlite().await).await;
}

async fn active_alert_blocks_after_window(store: Arc<dyn Store>) {
    let h = Harness::new(store).await;
    h.threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;

    let first = h.coordinator.ingest_at(temperature("35", t0()), t0()).await.unwrap();
    let alert_id = first.decision.created_alert().unwrap().id;

    let later = t0() + Duration::hours(3);
    let second = h
        .coordinator
        .ingest_at(temperature("36", later), later)
        .await
        .unwrap();
    assert_eq!(
        second.decision,
        AlertDecision::Suppressed {
            existing_alert_id: alert_id
        }
    );

    // Acknowledging frees the key; the next breach raises a new alert
    h.alerts
        .apply_at(alert_id, AlertAction::Acknowledge, "ana", None, later)
        .await
        .unwrap();
    let after_ack = later + Duration::minutes(1);
    let third = h
        .coordinator
        .ingest_at(temperature("36", after_ack), after_ack)
        .await
        .unwrap();
    assert!(third.decision.created_alert().is_some());
}

#[tokio::test]
async fn test_active_alert_blocks_after_window_memory() {
    active_alert_blocks_after_window(memory().await).await;
}

#[tokio::test]
async fn test_active_alert_blocks_after_window_sqlite() {
    active_alert_blocks_after_window(sqlite().await).await;
}

async fn concurrent_breaches(store: Arc<dyn Store>) {
    let h = Arc::new(Harness::new(store).await);
    h.threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let at = t0() - Duration::seconds(i);
                h.coordinator.ingest_at(temperature("40", at), t0()).await
            })
        })
        .collect();

    let mut created = 0;
    let mut suppressed = 0;
    for task in tasks {
        match task.await.unwrap().unwrap().decision {
            AlertDecision::Created(_) => created += 1,
            AlertDecision::Suppressed { .. } => suppressed += 1,
            other => panic!("unexpected decision {:?}", other),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(suppressed, 15);
    assert_eq!(h.alerts_for(BRIDGE).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaches_raise_one_alert_memory() {
    concurrent_breaches(memory().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaches_raise_one_alert_sqlite() {
    concurrent_breaches(sqlite().await).await;
}

#[tokio::test]
async fn test_acknowledge_resolved_alert_reports_no_effect() {
    let h = Harness::new(memory().await).await;
    h.threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;
    let ingested = h.coordinator.ingest_at(temperature("35", t0()), t0()).await.unwrap();
    let alert_id = ingested.decision.created_alert().unwrap().id;

    h.alerts
        .apply_at(alert_id, AlertAction::Resolve, "ana", None, t0())
        .await
        .unwrap();
    let outcome = h
        .alerts
        .apply_at(alert_id, AlertAction::Acknowledge, "ben", Some("late"), t0())
        .await
        .unwrap();
    assert!(matches!(outcome, ActionOutcome::NoEffect(_)));
    assert_eq!(outcome.alert().status, AlertStatus::Resolved);
    assert!(outcome.alert().resolution_notes.is_empty());
}

#[tokio::test]
async fn test_validation_rejects_before_persisting() {
    let h = Harness::new(memory().await).await;

    let mut wrong_station = temperature("20", t0());
    wrong_station.station_id = CREEK;
    let err = h.coordinator.ingest_at(wrong_station, t0()).await.unwrap_err();
    let IngestError::Validation(report) = err else {
        panic!("expected validation error");
    };
    assert_eq!(report.errors[0].field(), "sensor_id");

    let future = temperature("20", t0() + Duration::seconds(5));
    let err = h.coordinator.ingest_at(future, t0()).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = h
        .coordinator
        .ingest_at(ph(BRIDGE, 11, "15", t0()), t0())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert!(h.store.list_measurements(BRIDGE, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skipped_evaluations() {
    let store = memory().await;
    let h = Harness::new(Arc::clone(&store)).await;

    let no_threshold = h.coordinator.ingest_at(temperature("99", t0()), t0()).await.unwrap();
    assert_eq!(no_threshold.decision, AlertDecision::NoThreshold);

    let threshold_id = h
        .threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;
    let t1 = t0() + Duration::seconds(1);
    let normal = h.coordinator.ingest_at(temperature("30", t1), t1).await.unwrap();
    assert_eq!(normal.decision, AlertDecision::Normal);

    h.registry.set_active(threshold_id, false, "ops").await.unwrap();
    let t2 = t0() + Duration::seconds(2);
    let inactive = h.coordinator.ingest_at(temperature("99", t2), t2).await.unwrap();
    assert_eq!(inactive.decision, AlertDecision::NoThreshold);

    h.registry.set_active(threshold_id, true, "ops").await.unwrap();
    let mut station = Station::new(BRIDGE, "Rio Claro Bridge", "RC-01");
    station.auto_alerts_enabled = false;
    store.put_station(station).await.unwrap();
    let t3 = t0() + Duration::seconds(3);
    let disabled = h.coordinator.ingest_at(temperature("99", t3), t3).await.unwrap();
    assert_eq!(disabled.decision, AlertDecision::AlertsDisabled);

    assert!(h.alerts_for(BRIDGE).await.is_empty());
}

async fn reevaluation(store: Arc<dyn Store>) {
    let h = Harness::new(store).await;
    let stored = h.coordinator.ingest_at(temperature("35", t0()), t0()).await.unwrap();
    assert_eq!(stored.decision, AlertDecision::NoThreshold);

    h.threshold(BRIDGE, MeasurementType::Temperature, critical_max_30())
        .await;
    let again = h.coordinator.reevaluate_at(stored.measurement.id, t0()).await.unwrap();
    let alert = again.decision.created_alert().unwrap().clone();
    assert_eq!(alert.measurement_id, stored.measurement.id);

    h.alerts
        .apply_at(alert.id, AlertAction::Resolve, "ana", None, t0())
        .await
        .unwrap();
    let repeat = h.coordinator.reevaluate_at(stored.measurement.id, t0()).await.unwrap();
    assert_eq!(
        repeat.decision,
        AlertDecision::Suppressed {
            existing_alert_id: alert.id
        }
    );

    let err = h.coordinator.reevaluate_at(404, t0()).await.unwrap_err();
    assert!(matches!(err, IngestError::NotFound { entity: "measurement", id: 404 }));
}

#[tokio::test]
async fn test_reevaluation_memory() {
    reevaluation(memory().await).await;
}

#[tokio::test]
async fn test_reevaluation_sqlite() {
    reevaluation(sqlite().await).await;
}

#[tokio::test]
async fn test_batch_over_limit_is_rejected_whole() {
    let config = IngestConfig {
        batch_limit: 2,
        ..Default::default()
    };
    let h = Harness::with_config(memory().await, config).await;
    let batch = (0..3)
        .map(|i| temperature("20", t0() - Duration::seconds(i)))
        .collect();

    let err = h.coordinator.ingest_batch_at(batch, t0()).await.unwrap_err();
    assert!(matches!(err, IngestError::BatchTooLarge { len: 3, limit: 2 }));
    assert!(h.store.list_measurements(BRIDGE, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_validation_errors_carry_fields() {
    let h = Harness::new(memory().await).await;
    let mut bad = temperature("20", t0());
    bad.sensor_id = 99;
    let report = h
        .coordinator
        .ingest_batch_at(vec![temperature("20", t0()), bad], t0())
        .await
        .unwrap();
    assert_eq!(report.created_count, 1);
    assert_eq!(report.errors[0].index, 1);
    assert_eq!(report.errors[0].kind, "validation");
    assert_eq!(report.errors[0].fields[0].field, "sensor_id");
}

#[tokio::test]
async fn test_undecodable_entry_is_reported_in_place() {
    let h = Harness::new(memory().await).await;
    let entry = |value: &str, unit: Option<&str>| {
        let mut item = serde_json::json!({
            "station_id": BRIDGE,
            "sensor_id": 10,
            "measurement_type": "temperature",
            "value": value,
            "timestamp": t0() - Duration::seconds(value.len() as i64),
        });
        if let Some(unit) = unit {
            item["unit"] = unit.into();
        }
        decode_measurement(item)
    };
    let entries = vec![entry("20", Some("C")), entry("21.5", None), entry("22.25", Some("C"))];

    let report = h.coordinator.ingest_entries_at(entries, t0()).await.unwrap();
    assert_eq!(report.created_count, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].index, 1);
    assert_eq!(report.errors[0].kind, "validation");
    assert_eq!(report.errors[0].fields[0].field, "unit");
    assert_eq!(h.store.list_measurements(BRIDGE, 10).await.unwrap().len(), 2);
}
