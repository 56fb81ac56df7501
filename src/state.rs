//! Source-of-truth snapshot: latest sensor reading per kind, actuator
//! on/off flags, a status tag, and a bounded history ring. Writers are the
//! controller loop and actuators; readers are the decision engine and the
//! status hook.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

pub const MAX_SNAPSHOTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    SoilMoisture,
    Rain,
    WaterLevel,
    AirClimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum SensorReading {
    SoilMoisture {
        percent: u8,
        is_dry: bool,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        simulated: bool,
    },
    Rain {
        detected: bool,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        simulated: bool,
    },
    WaterLevel {
        percent: u8,
        detected: bool,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        simulated: bool,
    },
    AirClimate {
        temperature_c: f32,
        humidity_pct: u8,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        simulated: bool,
    },
}

impl SensorReading {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorReading::SoilMoisture { .. } => SensorKind::SoilMoisture,
            SensorReading::Rain { .. } => SensorKind::Rain,
            SensorReading::WaterLevel { .. } => SensorKind::WaterLevel,
            SensorReading::AirClimate { .. } => SensorKind::AirClimate,
        }
    }

    pub fn at(&self) -> OffsetDateTime {
        match self {
            SensorReading::SoilMoisture { at, .. }
            | SensorReading::Rain { at, .. }
            | SensorReading::WaterLevel { at, .. }
            | SensorReading::AirClimate { at, .. } => *at,
        }
    }

    /// Whether this reading came from the simulated backend rather than a
    /// real sensor, carried through to the store so downstream consumers
    /// can tell the two apart.
    pub fn simulated(&self) -> bool {
        match self {
            SensorReading::SoilMoisture { simulated, .. }
            | SensorReading::Rain { simulated, .. }
            | SensorReading::WaterLevel { simulated, .. }
            | SensorReading::AirClimate { simulated, .. } => *simulated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTag {
    Idle,
    Irrigating,
    Raining,
    Warning,
    Error,
    NoWater,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorName {
    Pump,
    LedRed,
    LedGreen,
    LedYellow,
    LedWhite,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub status: StatusTag,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    sensors: HashMap<SensorKind, SensorReading>,
    actuators: HashMap<ActuatorName, bool>,
    pub status: StatusTag,
    pub error: Option<String>,
    pub warning: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    history: VecDeque<Snapshot>,
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            sensors: HashMap::new(),
            actuators: HashMap::new(),
            status: StatusTag::Idle,
            error: None,
            warning: None,
            last_update: OffsetDateTime::now_utc(),
            history: VecDeque::new(),
        }
    }

    pub fn record_reading(&mut self, reading: SensorReading) {
        self.sensors.insert(reading.kind(), reading);
        self.last_update = OffsetDateTime::now_utc();
    }

    pub fn reading(&self, kind: SensorKind) -> Option<&SensorReading> {
        self.sensors.get(&kind)
    }

    pub fn set_actuator(&mut self, name: ActuatorName, on: bool) {
        self.actuators.insert(name, on);
    }

    pub fn actuator(&self, name: ActuatorName) -> bool {
        self.actuators.get(&name).copied().unwrap_or(false)
    }

    pub fn set_status(&mut self, status: StatusTag) {
        self.status = status;
        self.push_snapshot();
    }

    fn push_snapshot(&mut self) {
        self.history.push_back(Snapshot {
            at: OffsetDateTime::now_utc(),
            status: self.status,
        });
        while self.history.len() > MAX_SNAPSHOTS {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<Snapshot> {
        &self.history
    }

    pub fn is_raining(&self) -> bool {
        matches!(
            self.reading(SensorKind::Rain),
            Some(SensorReading::Rain { detected: true, .. })
        )
    }

    pub fn soil_is_dry(&self, threshold_pct: u8) -> bool {
        match self.reading(SensorKind::SoilMoisture) {
            Some(SensorReading::SoilMoisture { percent, .. }) => *percent < threshold_pct,
            _ => false,
        }
    }

    pub fn water_is_low(&self, threshold_pct: u8) -> bool {
        match self.reading(SensorKind::WaterLevel) {
            Some(SensorReading::WaterLevel { percent, .. }) => *percent < threshold_pct,
            None => true, // missing water-level data is fail-safe LOW
            _ => false,
        }
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Arc<RwLock<SystemState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(SystemState::new()))
}
