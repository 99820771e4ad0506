//! Station and sensor records owned by the station directory

use serde::{Deserialize, Serialize};

use crate::{DbId, MeasurementType};

/// A monitoring site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: DbId,
    pub name: String,
    pub code: String,
    pub is_active: bool,
    /// Per-station switch for automatic alert generation
    pub auto_alerts_enabled: bool,
}

impl Station {
    pub fn new(id: DbId, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            code: code.into(),
            is_active: true,
            auto_alerts_enabled: true,
        }
    }
}

/// A device installed at a station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: DbId,
    pub station_id: DbId,
    pub name: String,
    /// Quantity the sensor is built for; `None` for generic loggers
    pub sensor_type: Option<MeasurementType>,
    pub unit: String,
    pub is_active: bool,
}

impl Sensor {
    pub fn new(
        id: DbId,
        station_id: DbId,
        sensor_type: MeasurementType,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id,
            station_id,
            name: format!("{} sensor {}", sensor_type.label(), id),
            sensor_type: Some(sensor_type),
            unit: unit.into(),
            is_active: true,
        }
    }
}
