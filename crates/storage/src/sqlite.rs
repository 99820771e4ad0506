//! SQLite Store
//!
//! Timestamps are stored as integer microseconds since the epoch, decimals as
//! text, metadata as JSON text. Writers are serialized through one async mutex
//! since SQLite allows a single writer at a time.

use crate::{
    AlertInsert, AlertStore, MeasurementStore, RecordOutcome, StationDirectory, StorageError,
    ThresholdStore,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use model::{
    Alert, AlertFilter, AlertLevel, AlertStatus, DbId, Measurement, MeasurementType, Metadata,
    NewAlert, NewMeasurement, NewThreshold, Sensor, Station, Threshold, ThresholdBounds,
    ThresholdUpdate,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS stations (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        code TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        auto_alerts_enabled INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sensors (
        id INTEGER PRIMARY KEY,
        station_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        sensor_type TEXT,
        unit TEXT NOT NULL,
        is_active INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS measurements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_id INTEGER NOT NULL,
        sensor_id INTEGER NOT NULL,
        measurement_type TEXT NOT NULL,
        value TEXT NOT NULL,
        raw_value TEXT,
        unit TEXT NOT NULL,
        quality_flag TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        received_at INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        UNIQUE (station_id, sensor_id, timestamp)
    )",
    "CREATE INDEX IF NOT EXISTS measurements_station_time
        ON measurements (station_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS thresholds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_id INTEGER NOT NULL,
        measurement_type TEXT NOT NULL,
        warning_min TEXT,
        warning_max TEXT,
        critical_min TEXT,
        critical_max TEXT,
        unit TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        created_by TEXT,
        updated_by TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        notes TEXT NOT NULL,
        UNIQUE (station_id, measurement_type)
    )",
    "CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_id INTEGER NOT NULL,
        measurement_id INTEGER NOT NULL UNIQUE REFERENCES measurements (id),
        threshold_id INTEGER NOT NULL,
        level TEXT NOT NULL,
        status TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        triggered_at INTEGER NOT NULL,
        acknowledged_at INTEGER,
        acknowledged_by TEXT,
        resolved_at INTEGER,
        resolved_by TEXT,
        resolution_notes TEXT NOT NULL,
        metadata TEXT NOT NULL
    )",
    // One active alert per (station, threshold)
    "CREATE UNIQUE INDEX IF NOT EXISTS alerts_one_active
        ON alerts (station_id, threshold_id) WHERE status = 'active'",
    "CREATE INDEX IF NOT EXISTS alerts_station_triggered
        ON alerts (station_id, triggered_at)",
];

const MEASUREMENT_COLUMNS: &str = "id, station_id, sensor_id, measurement_type, value, \
    raw_value, unit, quality_flag, timestamp, received_at, metadata";

const THRESHOLD_COLUMNS: &str = "id, station_id, measurement_type, warning_min, warning_max, \
    critical_min, critical_max, unit, is_active, created_by, updated_by, created_at, \
    updated_at, notes";

const ALERT_COLUMNS: &str = "id, station_id, measurement_id, threshold_id, level, status, \
    title, message, triggered_at, acknowledged_at, acknowledged_by, resolved_at, \
    resolved_by, resolution_notes, metadata";

/// Store backed by a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
    write: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!(url, max_connections, "Opened SQLite store");
        Self::with_pool(pool).await
    }

    /// Private in-memory database.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self {
            pool,
            write: Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if missing
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "Schema migrated");
        Ok(())
    }
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_micros(value)
        .single()
        .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp {}", value)))
}

fn opt_from_micros(value: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(from_micros).transpose()
}

fn parse_text<T>(column: &str, value: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", column, e)))
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, StorageError> {
    row.try_get::<Option<String>, _>(column)?
        .map(|v| parse_text(column, &v))
        .transpose()
}

fn metadata_column(row: &SqliteRow) -> Result<Metadata, StorageError> {
    let raw: String = row.try_get("metadata")?;
    Ok(serde_json::from_str(&raw)?)
}

fn station_from_row(row: &SqliteRow) -> Result<Station, StorageError> {
    Ok(Station {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        is_active: row.try_get("is_active")?,
        auto_alerts_enabled: row.try_get("auto_alerts_enabled")?,
    })
}

fn sensor_from_row(row: &SqliteRow) -> Result<Sensor, StorageError> {
    let sensor_type: Option<String> = row.try_get("sensor_type")?;
    Ok(Sensor {
        id: row.try_get("id")?,
        station_id: row.try_get("station_id")?,
        name: row.try_get("name")?,
        sensor_type: sensor_type
            .map(|t| parse_text("sensor_type", &t))
            .transpose()?,
        unit: row.try_get("unit")?,
        is_active: row.try_get("is_active")?,
    })
}

fn measurement_from_row(row: &SqliteRow) -> Result<Measurement, StorageError> {
    let measurement_type: String = row.try_get("measurement_type")?;
    let quality_flag: String = row.try_get("quality_flag")?;
    let value: String = row.try_get("value")?;
    Ok(Measurement {
        id: row.try_get("id")?,
        station_id: row.try_get("station_id")?,
        sensor_id: row.try_get("sensor_id")?,
        measurement_type: parse_text("measurement_type", &measurement_type)?,
        value: parse_text("value", &value)?,
        raw_value: decimal_column(row, "raw_value")?,
        unit: row.try_get("unit")?,
        quality_flag: parse_text("quality_flag", &quality_flag)?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
        received_at: from_micros(row.try_get("received_at")?)?,
        metadata: metadata_column(row)?,
    })
}

fn threshold_from_row(row: &SqliteRow) -> Result<Threshold, StorageError> {
    let measurement_type: String = row.try_get("measurement_type")?;
    Ok(Threshold {
        id: row.try_get("id")?,
        station_id: row.try_get("station_id")?,
        measurement_type: parse_text("measurement_type", &measurement_type)?,
        bounds: ThresholdBounds {
            warning_min: decimal_column(row, "warning_min")?,
            warning_max: decimal_column(row, "warning_max")?,
            critical_min: decimal_column(row, "critical_min")?,
            critical_max: decimal_column(row, "critical_max")?,
        },
        unit: row.try_get("unit")?,
        is_active: row.try_get("is_active")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
        notes: row.try_get("notes")?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, StorageError> {
    let level: String = row.try_get("level")?;
    let status: String = row.try_get("status")?;
    Ok(Alert {
        id: row.try_get("id")?,
        station_id: row.try_get("station_id")?,
        measurement_id: row.try_get("measurement_id")?,
        threshold_id: row.try_get("threshold_id")?,
        level: parse_text("level", &level)?,
        status: parse_text("status", &status)?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        triggered_at: from_micros(row.try_get("triggered_at")?)?,
        acknowledged_at: opt_from_micros(row.try_get("acknowledged_at")?)?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        resolved_at: opt_from_micros(row.try_get("resolved_at")?)?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
        metadata: metadata_column(row)?,
    })
}

fn text(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Window check, then an insert that yields to the uniqueness constraints
async fn insert_alert_guarded(
    conn: &mut SqliteConnection,
    new: NewAlert,
) -> Result<AlertInsert, StorageError> {
    let sql = format!(
        "SELECT {} FROM alerts WHERE station_id = ? AND threshold_id = ? \
         AND status = 'active' AND triggered_at >= ? LIMIT 1",
        ALERT_COLUMNS
    );
    let recent = sqlx::query(&sql)
        .bind(new.station_id)
        .bind(new.threshold_id)
        .bind(micros(new.suppress_since))
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = recent {
        let existing = alert_from_row(&row)?;
        debug!(
            station_id = new.station_id,
            threshold_id = new.threshold_id,
            alert_id = existing.id,
            "Recent active alert found"
        );
        return Ok(AlertInsert::Suppressed { existing });
    }

    let metadata = serde_json::to_string(&new.metadata)?;
    let inserted = sqlx::query(
        "INSERT INTO alerts (station_id, measurement_id, threshold_id, level, status, title, \
         message, triggered_at, resolution_notes, metadata) \
         VALUES (?, ?, ?, ?, 'active', ?, ?, ?, '', ?) \
         ON CONFLICT DO NOTHING RETURNING id",
    )
    .bind(new.station_id)
    .bind(new.measurement_id)
    .bind(new.threshold_id)
    .bind(new.level.as_str())
    .bind(&new.title)
    .bind(&new.message)
    .bind(micros(new.triggered_at))
    .bind(&metadata)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = inserted {
        let id: DbId = row.try_get("id")?;
        return Ok(AlertInsert::Created(Alert::from_new(id, new)));
    }

    let sql = format!(
        "SELECT {} FROM alerts WHERE measurement_id = ? \
         OR (station_id = ? AND threshold_id = ? AND status = 'active') \
         ORDER BY id LIMIT 1",
        ALERT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(new.measurement_id)
        .bind(new.station_id)
        .bind(new.threshold_id)
        .fetch_one(&mut *conn)
        .await?;
    let existing = alert_from_row(&row)?;
    debug!(
        station_id = new.station_id,
        threshold_id = new.threshold_id,
        alert_id = existing.id,
        "Alert insert yielded to existing alert"
    );
    Ok(AlertInsert::Suppressed { existing })
}

#[async_trait]
impl StationDirectory for SqliteStore {
    async fn get_station(&self, id: DbId) -> Result<Option<Station>, StorageError> {
        sqlx::query("SELECT id, name, code, is_active, auto_alerts_enabled FROM stations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(station_from_row)
            .transpose()
    }

    async fn get_sensor(&self, id: DbId) -> Result<Option<Sensor>, StorageError> {
        sqlx::query(
            "SELECT id, station_id, name, sensor_type, unit, is_active FROM sensors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(sensor_from_row)
        .transpose()
    }

    async fn put_station(&self, station: Station) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;
        sqlx::query(
            "INSERT INTO stations (id, name, code, is_active, auto_alerts_enabled) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, code = excluded.code, \
             is_active = excluded.is_active, auto_alerts_enabled = excluded.auto_alerts_enabled",
        )
        .bind(station.id)
        .bind(&station.name)
        .bind(&station.code)
        .bind(station.is_active)
        .bind(station.auto_alerts_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_sensor(&self, sensor: Sensor) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;
        sqlx::query(
            "INSERT INTO sensors (id, station_id, name, sensor_type, unit, is_active) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET station_id = excluded.station_id, \
             name = excluded.name, sensor_type = excluded.sensor_type, \
             unit = excluded.unit, is_active = excluded.is_active",
        )
        .bind(sensor.id)
        .bind(sensor.station_id)
        .bind(&sensor.name)
        .bind(sensor.sensor_type.map(|t| t.as_str()))
        .bind(&sensor.unit)
        .bind(sensor.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MeasurementStore for SqliteStore {
    async fn record_measurement(
        &self,
        new: NewMeasurement,
        received_at: DateTime<Utc>,
        alert: Option<NewAlert>,
    ) -> Result<RecordOutcome, StorageError> {
        let _guard = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        let metadata = serde_json::to_string(&new.metadata)?;
        let inserted = sqlx::query(
            "INSERT INTO measurements (station_id, sensor_id, measurement_type, value, raw_value, \
             unit, quality_flag, timestamp, received_at, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(new.station_id)
        .bind(new.sensor_id)
        .bind(new.measurement_type.as_str())
        .bind(new.value.to_string())
        .bind(text(new.raw_value))
        .bind(&new.unit)
        .bind(new.quality_flag.as_str())
        .bind(micros(new.timestamp))
        .bind(micros(received_at))
        .bind(&metadata)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            // Dropping the transaction rolls it back
            return Err(StorageError::DuplicateMeasurement {
                station_id: new.station_id,
                sensor_id: new.sensor_id,
                timestamp: new.timestamp,
            });
        };
        let id: DbId = row.try_get("id")?;
        let measurement = Measurement::from_new(id, new, received_at);

        let alert = match alert {
            Some(mut new_alert) => {
                new_alert.measurement_id = id;
                insert_alert_guarded(&mut *tx, new_alert).await?
            }
            None => AlertInsert::NotRequested,
        };

        tx.commit().await?;
        Ok(RecordOutcome { measurement, alert })
    }

    async fn get_measurement(&self, id: DbId) -> Result<Option<Measurement>, StorageError> {
        let sql = format!("SELECT {} FROM measurements WHERE id = ?", MEASUREMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(measurement_from_row)
            .transpose()
    }

    async fn list_measurements(
        &self,
        station_id: DbId,
        limit: usize,
    ) -> Result<Vec<Measurement>, StorageError> {
        let sql = format!(
            "SELECT {} FROM measurements WHERE station_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
            MEASUREMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(station_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(measurement_from_row)
            .collect()
    }
}

#[async_trait]
impl ThresholdStore for SqliteStore {
    async fn find_threshold(
        &self,
        station_id: DbId,
        measurement_type: MeasurementType,
    ) -> Result<Option<Threshold>, StorageError> {
        let sql = format!(
            "SELECT {} FROM thresholds WHERE station_id = ? AND measurement_type = ?",
            THRESHOLD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(station_id)
            .bind(measurement_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(threshold_from_row)
            .transpose()
    }

    async fn get_threshold(&self, id: DbId) -> Result<Option<Threshold>, StorageError> {
        let sql = format!("SELECT {} FROM thresholds WHERE id = ?", THRESHOLD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(threshold_from_row)
            .transpose()
    }

    async fn list_thresholds(
        &self,
        station_id: Option<DbId>,
    ) -> Result<Vec<Threshold>, StorageError> {
        let sql = format!(
            "SELECT {} FROM thresholds WHERE (?1 IS NULL OR station_id = ?1) ORDER BY id",
            THRESHOLD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(station_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(threshold_from_row)
            .collect()
    }

    async fn insert_threshold(
        &self,
        new: NewThreshold,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError> {
        let _guard = self.write.lock().await;
        let inserted = sqlx::query(
            "INSERT INTO thresholds (station_id, measurement_type, warning_min, warning_max, \
             critical_min, critical_max, unit, is_active, created_by, updated_by, created_at, \
             updated_at, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(new.station_id)
        .bind(new.measurement_type.as_str())
        .bind(text(new.bounds.warning_min))
        .bind(text(new.bounds.warning_max))
        .bind(text(new.bounds.critical_min))
        .bind(text(new.bounds.critical_max))
        .bind(&new.unit)
        .bind(new.is_active)
        .bind(actor)
        .bind(actor)
        .bind(micros(now))
        .bind(micros(now))
        .bind(&new.notes)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = inserted else {
            return Err(StorageError::DuplicateConfiguration {
                station_id: new.station_id,
                measurement_type: new.measurement_type,
            });
        };

        Ok(Threshold {
            id: row.try_get("id")?,
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
        })
    }

    async fn update_threshold(
        &self,
        id: DbId,
        update: ThresholdUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Threshold, StorageError> {
        let _guard = self.write.lock().await;
        let sql = format!(
            "UPDATE thresholds SET warning_min = ?, warning_max = ?, critical_min = ?, \
             critical_max = ?, unit = ?, is_active = ?, notes = ?, updated_by = ?, \
             updated_at = ? WHERE id = ? RETURNING {}",
            THRESHOLD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(text(update.bounds.warning_min))
            .bind(text(update.bounds.warning_max))
            .bind(text(update.bounds.critical_min))
            .bind(text(update.bounds.critical_max))
            .bind(&update.unit)
            .bind(update.is_active)
            .bind(&update.notes)
            .bind(actor)
            .bind(micros(now))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "threshold",
                id,
            })?;
        threshold_from_row(&row)
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn attach_alert(&self, new: NewAlert) -> Result<AlertInsert, StorageError> {
        let _guard = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM measurements WHERE id = ?")
            .bind(new.measurement_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::NotFound {
                entity: "measurement",
                id: new.measurement_id,
            });
        }

        let outcome = insert_alert_guarded(&mut *tx, new).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_alert(&self, id: DbId) -> Result<Option<Alert>, StorageError> {
        let sql = format!("SELECT {} FROM alerts WHERE id = ?", ALERT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(alert_from_row)
            .transpose()
    }

    async fn find_active_alert(
        &self,
        station_id: DbId,
        threshold_id: DbId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Alert>, StorageError> {
        let sql = format!(
            "SELECT {} FROM alerts WHERE station_id = ?1 AND threshold_id = ?2 \
             AND status = 'active' AND (?3 IS NULL OR triggered_at >= ?3) LIMIT 1",
            ALERT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(station_id)
            .bind(threshold_id)
            .bind(since.map(micros))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(alert_from_row)
            .transpose()
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        let sql = format!(
            "SELECT {} FROM alerts \
             WHERE (?1 IS NULL OR station_id = ?1) \
             AND (?2 IS NULL OR status = ?2) \
             AND (?3 IS NULL OR level = ?3) \
             ORDER BY triggered_at DESC, id DESC LIMIT ?4",
            ALERT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.station_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.level.map(|l| l.as_str()))
            .bind(i64::try_from(filter.effective_limit()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(alert_from_row)
            .collect()
    }

    async fn active_alert_counts(&self) -> Result<Vec<(DbId, AlertLevel, u64)>, StorageError> {
        let rows = sqlx::query(
            "SELECT station_id, level, COUNT(*) AS n FROM alerts \
             WHERE status = 'active' GROUP BY station_id, level ORDER BY station_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let level: String = row.try_get("level")?;
                let n: i64 = row.try_get("n")?;
                Ok((
                    row.try_get("station_id")?,
                    parse_text("level", &level)?,
                    u64::try_from(n).unwrap_or(0),
                ))
            })
            .collect()
    }

    async fn compare_and_update_alert(
        &self,
        expected: AlertStatus,
        alert: &Alert,
    ) -> Result<bool, StorageError> {
        let _guard = self.write.lock().await;
        let result = sqlx::query(
            "UPDATE alerts SET status = ?, acknowledged_at = ?, acknowledged_by = ?, \
             resolved_at = ?, resolved_by = ?, resolution_notes = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(alert.status.as_str())
        .bind(alert.acknowledged_at.map(micros))
        .bind(&alert.acknowledged_by)
        .bind(alert.resolved_at.map(micros))
        .bind(&alert.resolved_by)
        .bind(&alert.resolution_notes)
        .bind(alert.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT id FROM alerts WHERE id = ?")
            .bind(alert.id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound {
                entity: "alert",
                id: alert.id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use model::QualityFlag;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn reading(value: i64, at: DateTime<Utc>) -> NewMeasurement {
        NewMeasurement {
            station_id: 1,
            sensor_id: 10,
            measurement_type: MeasurementType::Temperature,
            value: Decimal::new(value, 1),
            raw_value: Some(Decimal::new(value + 1, 1)),
            unit: "C".into(),
            quality_flag: QualityFlag::Suspect,
            timestamp: at,
            metadata: Default::default(),
        }
    }

    fn alert_for(threshold_id: DbId, at: DateTime<Utc>) -> NewAlert {
        let mut metadata = Metadata::new();
        metadata.insert("auto_generated".into(), serde_json::Value::Bool(true));
        NewAlert {
            station_id: 1,
            measurement_id: 0,
            threshold_id,
            level: AlertLevel::Warning,
            title: "Warning threshold exceeded at Bridge".into(),
            message: "Value 35.0 C".into(),
            triggered_at: at,
            suppress_since: at - ChronoDuration::hours(1),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_measurement_round_trips_through_columns() {
        let store = SqliteStore::in_memory().await.unwrap();
        let outcome = store
            .record_measurement(reading(355, t0()), t0(), None)
            .await
            .unwrap();
        assert_eq!(outcome.alert, AlertInsert::NotRequested);

        let loaded = store
            .get_measurement(outcome.measurement.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, outcome.measurement);
        assert_eq!(loaded.value, Decimal::new(355, 1));
        assert_eq!(loaded.quality_flag, QualityFlag::Suspect);
    }

    #[tokio::test]
    async fn test_duplicate_measurement_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .record_measurement(reading(355, t0()), t0(), Some(alert_for(3, t0())))
            .await
            .unwrap();

        let err = store
            .record_measurement(reading(360, t0()), t0(), Some(alert_for(4, t0())))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateMeasurement { .. }));
        assert!(store.find_active_alert(1, 4, None).await.unwrap().is_none());
        assert_eq!(store.list_measurements(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_index_blocks_second_active_alert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .record_measurement(reading(355, t0()), t0(), Some(alert_for(3, t0())))
            .await
            .unwrap();
        let AlertInsert::Created(created) = first.alert else {
            panic!("expected a new alert");
        };

        // Outside the window, the active alert still holds the key
        let later = t0() + ChronoDuration::hours(2);
        let second = store
            .record_measurement(reading(360, later), later, Some(alert_for(3, later)))
            .await
            .unwrap();
        assert_eq!(second.alert, AlertInsert::Suppressed { existing: created.clone() });

        // Once closed, the key is free again
        let mut resolved = created.clone();
        resolved.status = AlertStatus::Resolved;
        resolved.resolved_at = Some(later);
        resolved.resolved_by = Some("ops".into());
        assert!(store
            .compare_and_update_alert(AlertStatus::Active, &resolved)
            .await
            .unwrap());

        let third_at = later + ChronoDuration::minutes(1);
        let third = store
            .record_measurement(reading(370, third_at), third_at, Some(alert_for(3, third_at)))
            .await
            .unwrap();
        assert!(matches!(third.alert, AlertInsert::Created(_)));

        let counts = store.active_alert_counts().await.unwrap();
        assert_eq!(counts, vec![(1, AlertLevel::Warning, 1)]);
    }

    #[tokio::test]
    async fn test_list_alerts_filters_and_orders() {
        let store = SqliteStore::in_memory().await.unwrap();
        for (i, threshold_id) in [5, 6, 7].into_iter().enumerate() {
            let at = t0() + ChronoDuration::minutes(i as i64);
            store
                .record_measurement(reading(355, at), at, Some(alert_for(threshold_id, at)))
                .await
                .unwrap();
        }

        let all = store.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].threshold_id, 7);
        assert_eq!(all[0].metadata.get("auto_generated"), Some(&serde_json::Value::Bool(true)));

        let filter = AlertFilter {
            level: Some(AlertLevel::Critical),
            ..Default::default()
        };
        assert!(store.list_alerts(&filter).await.unwrap().is_empty());

        let limited = AlertFilter {
            limit: 2,
            ..AlertFilter::active()
        };
        assert_eq!(store.list_alerts(&limited).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_insert_and_update() {
        let store = SqliteStore::in_memory().await.unwrap();
        let bounds = ThresholdBounds {
            warning_min: Some(Decimal::new(65, 1)),
            critical_min: Some(Decimal::new(6, 0)),
            ..Default::default()
        };
        let new = NewThreshold::new(1, MeasurementType::Ph, bounds, "pH");
        let created = store.insert_threshold(new.clone(), "ops", t0()).await.unwrap();

        let err = store.insert_threshold(new, "ops", t0()).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateConfiguration { .. }));

        let mut update = ThresholdUpdate::from_current(&created);
        update.is_active = false;
        let later = t0() + ChronoDuration::minutes(5);
        let updated = store
            .update_threshold(created.id, update, "supervisor", later)
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.bounds, bounds);
        assert_eq!(updated.created_by.as_deref(), Some("ops"));
        assert_eq!(updated.updated_by.as_deref(), Some("supervisor"));
        assert_eq!(updated.updated_at, later);

        let found = store
            .find_threshold(1, MeasurementType::Ph)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, updated);
    }

    #[tokio::test]
    async fn test_station_directory() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut station = Station::new(1, "Rio Claro Bridge", "RC-01");
        station.auto_alerts_enabled = false;
        store.put_station(station.clone()).await.unwrap();
        store
            .put_sensor(Sensor::new(10, 1, MeasurementType::Ph, "pH"))
            .await
            .unwrap();

        assert_eq!(store.get_station(1).await.unwrap(), Some(station));
        let sensor = store.get_sensor(10).await.unwrap().unwrap();
        assert_eq!(sensor.sensor_type, Some(MeasurementType::Ph));
        assert!(store.get_sensor(11).await.unwrap().is_none());
    }
}
