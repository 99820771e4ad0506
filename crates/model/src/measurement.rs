//! Measurement records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{DbId, Metadata, ParseEnumError};

/// Kind of physical quantity a sensor reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    WaterLevel,
    FlowRate,
    Temperature,
    Ph,
    Rainfall,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 5] = [
        MeasurementType::WaterLevel,
        MeasurementType::FlowRate,
        MeasurementType::Temperature,
        MeasurementType::Ph,
        MeasurementType::Rainfall,
    ];

    /// Wire and storage name
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementType::WaterLevel => "water_level",
            MeasurementType::FlowRate => "flow_rate",
            MeasurementType::Temperature => "temperature",
            MeasurementType::Ph => "ph",
            MeasurementType::Rainfall => "rainfall",
        }
    }

    /// Human label used in generated alert text
    pub fn label(self) -> &'static str {
        match self {
            MeasurementType::WaterLevel => "water level",
            MeasurementType::FlowRate => "flow rate",
            MeasurementType::Temperature => "temperature",
            MeasurementType::Ph => "pH",
            MeasurementType::Rainfall => "rainfall",
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MeasurementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("measurement type", s))
    }
}

/// Data-quality annotation. Orthogonal to alerting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    #[default]
    Good,
    Suspect,
    Poor,
    Missing,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityFlag::Good => "good",
            QualityFlag::Suspect => "suspect",
            QualityFlag::Poor => "poor",
            QualityFlag::Missing => "missing",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityFlag {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "good" => Ok(QualityFlag::Good),
            "suspect" => Ok(QualityFlag::Suspect),
            "poor" => Ok(QualityFlag::Poor),
            "missing" => Ok(QualityFlag::Missing),
            other => Err(ParseEnumError::new("quality flag", other)),
        }
    }
}

/// A measurement as submitted by a station, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeasurement {
    pub station_id: DbId,
    pub sensor_id: DbId,
    pub measurement_type: MeasurementType,
    pub value: Decimal,
    /// Uncalibrated reading, if the station reports one
    #[serde(default)]
    pub raw_value: Option<Decimal>,
    pub unit: String,
    #[serde(default)]
    pub quality_flag: QualityFlag,
    /// Event time at the station
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A persisted measurement. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: DbId,
    pub station_id: DbId,
    pub sensor_id: DbId,
    pub measurement_type: MeasurementType,
    pub value: Decimal,
    pub raw_value: Option<Decimal>,
    pub unit: String,
    pub quality_flag: QualityFlag,
    pub timestamp: DateTime<Utc>,
    /// Server-side receive time
    pub received_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Measurement {
    /// Build the stored record from a validated submission
    pub fn from_new(id: DbId, new: NewMeasurement, received_at: DateTime<Utc>) -> Self {
        Self {
            id,
            station_id: new.station_id,
            sensor_id: new.sensor_id,
            measurement_type: new.measurement_type,
            value: new.value,
            raw_value: new.raw_value,
            unit: new.unit,
            quality_flag: new.quality_flag,
            timestamp: new.timestamp,
            received_at,
            metadata: new.metadata,
        }
    }
}
