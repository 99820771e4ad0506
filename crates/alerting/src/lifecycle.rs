//! Alert Lifecycle
//!
//! State machine:
//!
//! ```text
//! active ──acknowledge──▶ acknowledged
//!   │                        │
//!   ├──resolve / dismiss─────┴──▶ resolved | dismissed (terminal)
//! ```
//!
//! `acknowledge` outside `active` has no effect. `resolve` and `dismiss` from a
//! terminal state are rejected.

use chrono::{DateTime, Utc};
use model::{
    Alert, AlertStatus, DbId, Measurement, MeasurementType, Metadata, NewAlert, NewMeasurement,
    Station, Threshold,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::evaluator::Breach;

/// Operator action on an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Acknowledge,
    Resolve,
    Dismiss,
}

impl AlertAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertAction::Acknowledge => "acknowledge",
            AlertAction::Resolve => "resolve",
            AlertAction::Dismiss => "dismiss",
        }
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertAction {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acknowledge" => Ok(AlertAction::Acknowledge),
            "resolve" => Ok(AlertAction::Resolve),
            "dismiss" => Ok(AlertAction::Dismiss),
            other => Err(TransitionError::UnknownAction(other.to_string())),
        }
    }
}

/// Lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} alert {alert_id}: alert is {status}")]
    InvalidTransition {
        alert_id: DbId,
        action: AlertAction,
        status: AlertStatus,
    },
    #[error("unknown action '{0}', expected acknowledge, resolve or dismiss")]
    UnknownAction(String),
}

fn append_notes(existing: &mut String, notes: Option<&str>) {
    let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) else {
        return;
    };
    if !existing.is_empty() {
        existing.push('\n');
    }
    existing.push_str(notes);
}

/// Apply `action` to `alert`.
///
/// Returns `Ok(None)` when the action has no effect (acknowledging an alert
/// that is no longer active), otherwise the updated alert.
pub fn transition(
    alert: &Alert,
    action: AlertAction,
    actor: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, TransitionError> {
    let mut next = alert.clone();
    match (action, alert.status) {
        (AlertAction::Acknowledge, AlertStatus::Active) => {
            next.status = AlertStatus::Acknowledged;
            next.acknowledged_at = Some(now);
            next.acknowledged_by = Some(actor.to_string());
        }
        (AlertAction::Acknowledge, _) => return Ok(None),
        (AlertAction::Resolve | AlertAction::Dismiss, status) if status.is_terminal() => {
            return Err(TransitionError::InvalidTransition {
                alert_id: alert.id,
                action,
                status,
            });
        }
        (AlertAction::Resolve, _) => {
            next.status = AlertStatus::Resolved;
            next.resolved_at = Some(now);
            next.resolved_by = Some(actor.to_string());
        }
        (AlertAction::Dismiss, _) => {
            next.status = AlertStatus::Dismissed;
            next.resolved_at = Some(now);
            next.resolved_by = Some(actor.to_string());
        }
    }
    append_notes(&mut next.resolution_notes, notes);
    Ok(Some(next))
}

/// The parts of a measurement that alert text is built from
#[derive(Debug, Clone, Copy)]
pub struct Reading<'a> {
    pub station_id: DbId,
    /// Zero until the measurement is stored; the store fills it in
    pub measurement_id: DbId,
    pub measurement_type: MeasurementType,
    pub value: Decimal,
    pub unit: &'a str,
}

impl<'a> Reading<'a> {
    /// Reading for a measurement that is about to be stored
    pub fn pending(new: &'a NewMeasurement) -> Self {
        Self {
            station_id: new.station_id,
            measurement_id: 0,
            measurement_type: new.measurement_type,
            value: new.value,
            unit: &new.unit,
        }
    }
}

impl<'a> From<&'a Measurement> for Reading<'a> {
    fn from(m: &'a Measurement) -> Self {
        Self {
            station_id: m.station_id,
            measurement_id: m.id,
            measurement_type: m.measurement_type,
            value: m.value,
            unit: &m.unit,
        }
    }
}

/// Build the auto-generated alert for a breaching reading
pub fn draft_alert(
    reading: Reading<'_>,
    threshold: &Threshold,
    station: Option<&Station>,
    breach: &Breach,
    now: DateTime<Utc>,
    suppress_since: DateTime<Utc>,
) -> NewAlert {
    let tier = breach.classification.as_str();
    let place = station
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("#{}", reading.station_id));

    let mut tier_title = tier.to_string();
    if let Some(first) = tier_title.get_mut(0..1) {
        first.make_ascii_uppercase();
    }

    let mut metadata = Metadata::new();
    metadata.insert("value".into(), Value::String(reading.value.to_string()));
    metadata.insert("unit".into(), Value::String(reading.unit.to_string()));
    metadata.insert("threshold_level".into(), Value::String(tier.to_string()));
    metadata.insert("bound".into(), Value::String(breach.bound.to_string()));
    metadata.insert("limit".into(), Value::String(breach.limit.to_string()));
    metadata.insert("auto_generated".into(), Value::Bool(true));

    NewAlert {
        station_id: reading.station_id,
        measurement_id: reading.measurement_id,
        threshold_id: threshold.id,
        level: breach.level(),
        title: format!("{} threshold exceeded at {}", tier_title, place),
        message: format!(
            "Value {} {} of {} exceeded the configured {} threshold ({}).",
            reading.value,
            reading.unit,
            reading.measurement_type.label(),
            tier,
            breach.describe()
        ),
        triggered_at: now,
        suppress_since,
        metadata,
    }
}
