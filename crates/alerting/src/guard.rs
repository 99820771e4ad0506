//! Deduplication Guard

use chrono::{DateTime, Duration, Utc};
use model::{Alert, DbId};
use storage::{AlertStore, StorageError};
use tracing::debug;

/// Suppresses new alerts while a recent active alert covers the same
/// `(station, threshold)` pair.
///
/// `should_suppress` is the read-path check. The authoritative check runs
/// inside the store's alert insert, which also honours the active-alert
/// uniqueness constraint.
#[derive(Debug, Clone, Copy)]
pub struct DedupGuard {
    lookback: Duration,
}

impl DedupGuard {
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Oldest `triggered_at` that still suppresses at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }

    /// Whether `alert` by itself suppresses a new alert at `now`
    pub fn suppresses(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        alert.is_active() && alert.triggered_at >= self.window_start(now)
    }

    /// Check the store for a suppressing alert
    pub async fn should_suppress<S>(
        &self,
        store: &S,
        station_id: DbId,
        threshold_id: DbId,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>
    where
        S: AlertStore + ?Sized,
    {
        let existing = store
            .find_active_alert(station_id, threshold_id, Some(self.window_start(now)))
            .await?;
        if let Some(alert) = &existing {
            debug!(
                station_id,
                threshold_id,
                alert_id = alert.id,
                "Recent active alert suppresses new alert"
            );
        }
        Ok(existing.is_some())
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}
