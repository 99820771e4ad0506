//! Alert Manager Implementation

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use model::{ActiveAlertSummary, Alert, AlertFilter, DbId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{AlertStore, StationDirectory, StorageError, Store};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::guard::DedupGuard;
use crate::lifecycle::{transition, AlertAction, TransitionError};

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Look-back window for duplicate suppression (minutes)
    pub lookback_minutes: i64,
    /// Attempts at a lifecycle write before giving up on a contended alert
    pub max_transition_retries: u32,
}

impl AlertConfig {
    pub fn lookback(&self) -> Duration {
        Duration::minutes(self.lookback_minutes)
    }

    pub fn guard(&self) -> DedupGuard {
        DedupGuard::new(self.lookback())
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 60,
            max_transition_retries: 3,
        }
    }
}

/// Alert manager errors
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(DbId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("alert {id} kept changing; gave up after {attempts} attempts")]
    Contended { id: DbId, attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of an operator action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The alert changed state
    Applied(Alert),
    /// The action did not apply; the alert is returned unchanged
    NoEffect(Alert),
}

impl ActionOutcome {
    pub fn alert(&self) -> &Alert {
        match self {
            ActionOutcome::Applied(alert) | ActionOutcome::NoEffect(alert) => alert,
        }
    }

    pub fn into_alert(self) -> Alert {
        match self {
            ActionOutcome::Applied(alert) | ActionOutcome::NoEffect(alert) => alert,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied(_))
    }
}

/// Owns operator actions on stored alerts and the read-side alert queries
pub struct AlertManager {
    /// Configuration
    config: AlertConfig,
    store: Arc<dyn Store>,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(store: Arc<dyn Store>, config: AlertConfig) -> Self {
        info!(?config, "Creating alert manager");
        Self { config, store }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub async fn get(&self, id: DbId) -> Result<Alert, AlertError> {
        self.store
            .get_alert(id)
            .await?
            .ok_or(AlertError::NotFound(id))
    }

    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, AlertError> {
        Ok(self.store.list_alerts(filter).await?)
    }

    /// Active alerts grouped by station and level, named from the directory
    pub async fn active_summary(&self) -> Result<Vec<ActiveAlertSummary>, AlertError> {
        let counts = self.store.active_alert_counts().await?;
        let mut summary = ActiveAlertSummary::from_counts(counts);
        for entry in &mut summary {
            entry.station_name = self
                .store
                .get_station(entry.station_id)
                .await?
                .map(|station| station.name);
        }
        Ok(summary)
    }

    /// Whether a recent active alert covers the pair at `now`
    pub async fn is_suppressed(
        &self,
        station_id: DbId,
        threshold_id: DbId,
        now: DateTime<Utc>,
    ) -> Result<bool, AlertError> {
        Ok(self
            .config
            .guard()
            .should_suppress(self.store.as_ref(), station_id, threshold_id, now)
            .await?)
    }

    /// Apply an operator action now
    pub async fn apply(
        &self,
        id: DbId,
        action: AlertAction,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<ActionOutcome, AlertError> {
        self.apply_at(id, action, actor, notes, Utc::now()).await
    }

    /// Apply an operator action at `now`.
    ///
    /// The write is a compare-and-swap on the status that was read; losing a
    /// race re-reads the alert and re-runs the transition.
    pub async fn apply_at(
        &self,
        id: DbId,
        action: AlertAction,
        actor: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, AlertError> {
        let attempts = self.config.max_transition_retries.max(1);

        for attempt in 1..=attempts {
            let current = self.get(id).await?;

            let next = match transition(&current, action, actor, notes, now) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    debug!(alert_id = id, %action, status = %current.status, "Action has no effect");
                    counter!("alert_transitions_total", "action" => action.as_str(), "outcome" => "no_effect")
                        .increment(1);
                    return Ok(ActionOutcome::NoEffect(current));
                }
                Err(e) => {
                    counter!("alert_transitions_total", "action" => action.as_str(), "outcome" => "rejected")
                        .increment(1);
                    return Err(e.into());
                }
            };

            if self
                .store
                .compare_and_update_alert(current.status, &next)
                .await?
            {
                info!(
                    alert_id = id,
                    %action,
                    from = %current.status,
                    to = %next.status,
                    actor,
                    "Alert transitioned"
                );
                counter!("alert_transitions_total", "action" => action.as_str(), "outcome" => "applied")
                    .increment(1);
                return Ok(ActionOutcome::Applied(next));
            }

            debug!(alert_id = id, attempt, "Alert changed concurrently, retrying");
        }

        warn!(alert_id = id, attempts, "Giving up on contended alert");
        Err(AlertError::Contended { id, attempts })
    }
}
