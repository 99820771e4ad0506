//! Alert records and alert queries

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{DbId, Metadata, ParseEnumError};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::Critical,
        AlertLevel::Emergency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("alert level", s))
    }
}

/// Alert lifecycle status. `Resolved` and `Dismissed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Dismissed)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            "dismissed" => Ok(AlertStatus::Dismissed),
            other => Err(ParseEnumError::new("alert status", other)),
        }
    }
}

/// A threshold breach and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: DbId,
    pub station_id: DbId,
    /// Measurement that triggered the alert
    pub measurement_id: DbId,
    /// Threshold that was exceeded
    pub threshold_id: DbId,
    pub level: AlertLevel,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    /// Set at creation, never changed
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    /// Also stamped by dismiss
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: String,
    pub metadata: Metadata,
}

impl Alert {
    /// Build the stored record for a freshly created alert
    pub fn from_new(id: DbId, new: NewAlert) -> Self {
        Self {
            id,
            station_id: new.station_id,
            measurement_id: new.measurement_id,
            threshold_id: new.threshold_id,
            level: new.level,
            status: AlertStatus::Active,
            title: new.title,
            message: new.message,
            triggered_at: new.triggered_at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: String::new(),
            metadata: new.metadata,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Time since triggering; frozen once the alert is closed
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.resolved_at.unwrap_or(now) - self.triggered_at
    }

    pub fn duration_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.duration(now).num_minutes()
    }
}

/// Alert ready to be inserted.
///
/// `measurement_id` is filled in by the store when the alert is created in the
/// same unit of work as its measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub station_id: DbId,
    pub measurement_id: DbId,
    pub threshold_id: DbId,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    /// Start of the dedup look-back window
    pub suppress_since: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Filters for alert listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub station_id: Option<DbId>,
    pub status: Option<AlertStatus>,
    pub level: Option<AlertLevel>,
    pub limit: usize,
}

impl AlertFilter {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn active() -> Self {
        Self {
            status: Some(AlertStatus::Active),
            ..Default::default()
        }
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.station_id.map_or(true, |s| alert.station_id == s)
            && self.status.map_or(true, |s| alert.status == s)
            && self.level.map_or(true, |l| alert.level == l)
    }

    /// Limit clamped to `1..=MAX_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            station_id: None,
            status: None,
            level: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Per-level alert counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub info: u64,
    pub warning: u64,
    pub critical: u64,
    pub emergency: u64,
}

impl LevelCounts {
    pub fn add(&mut self, level: AlertLevel, count: u64) {
        match level {
            AlertLevel::Info => self.info += count,
            AlertLevel::Warning => self.warning += count,
            AlertLevel::Critical => self.critical += count,
            AlertLevel::Emergency => self.emergency += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.info + self.warning + self.critical + self.emergency
    }
}

/// Active alerts of one station grouped by level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlertSummary {
    pub station_id: DbId,
    /// Directory name; absent when the station is unknown
    #[serde(default)]
    pub station_name: Option<String>,
    pub total_alerts: u64,
    pub by_level: LevelCounts,
}

impl ActiveAlertSummary {
    /// Fold `(station, level, count)` rows into one summary per station,
    /// ordered by station id
    pub fn from_counts(rows: impl IntoIterator<Item = (DbId, AlertLevel, u64)>) -> Vec<Self> {
        let mut by_station: std::collections::BTreeMap<DbId, LevelCounts> = Default::default();
        for (station_id, level, count) in rows {
            by_station.entry(station_id).or_default().add(level, count);
        }
        by_station
            .into_iter()
            .map(|(station_id, by_level)| ActiveAlertSummary {
                station_id,
                station_name: None,
                total_alerts: by_level.total(),
                by_level,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert_at(triggered_at: DateTime<Utc>) -> Alert {
        Alert::from_new(
            1,
            NewAlert {
                station_id: 1,
                measurement_id: 10,
                threshold_id: 5,
                level: AlertLevel::Critical,
                title: "t".into(),
                message: "m".into(),
                triggered_at,
                suppress_since: triggered_at - Duration::hours(1),
                metadata: Metadata::new(),
            },
        )
    }

    #[test]
    fn test_duration_grows_while_open_and_freezes_when_closed() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut alert = alert_at(t0);
        assert_eq!(alert.duration_minutes(t0 + Duration::minutes(30)), 30);
        assert_eq!(alert.duration_minutes(t0 + Duration::minutes(90)), 90);

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(t0 + Duration::minutes(45));
        assert_eq!(alert.duration_minutes(t0 + Duration::days(3)), 45);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!AlertStatus::Active.is_terminal());
        assert!(!AlertStatus::Acknowledged.is_terminal());
        assert!(AlertStatus::Resolved.is_terminal());
        assert!(AlertStatus::Dismissed.is_terminal());
    }

    #[test]
    fn test_summary_groups_by_station() {
        let summary = ActiveAlertSummary::from_counts(vec![
            (2, AlertLevel::Warning, 1),
            (1, AlertLevel::Critical, 2),
            (1, AlertLevel::Warning, 3),
        ]);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].station_id, 1);
        assert_eq!(summary[0].total_alerts, 5);
        assert_eq!(summary[0].by_level.critical, 2);
        assert_eq!(summary[1].by_level.warning, 1);
    }

    #[test]
    fn test_filter_limit_is_clamped() {
        let filter = AlertFilter {
            limit: 10_000,
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), AlertFilter::MAX_LIMIT);
        assert_eq!(AlertFilter { limit: 0, ..Default::default() }.effective_limit(), 1);
    }
}
