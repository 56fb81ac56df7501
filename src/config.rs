//! Layered configuration: a TOML file provides the base, environment
//! variables overlay it, `validate()` enforces invariants before any pin
//! is claimed.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub soil_moisture_pin: u8,
    pub dht_pin: u8,
    pub rain_pin: u8,
    pub water_level_pin: u8,
    pub pump_relay_pin: u8,
    pub led_red_pin: u8,
    pub led_green_pin: u8,
    pub led_yellow_pin: u8,
    pub led_white_pin: u8,
    /// Invert WaterLevel polarity: when true, raw=1 means "not detected".
    pub water_level_active_low: bool,
    /// Relays/LEDs driven by an active-low board (LOW = on).
    pub active_low: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            soil_moisture_pin: 17,
            dht_pin: 27,
            rain_pin: 22,
            water_level_pin: 23,
            pump_relay_pin: 24,
            led_red_pin: 5,
            led_green_pin: 6,
            led_yellow_pin: 13,
            led_white_pin: 19,
            water_level_active_low: false,
            active_low: true,
        }
    }
}

impl PinConfig {
    fn entries(&self) -> [(&'static str, u8); 9] {
        [
            ("soil_moisture_pin", self.soil_moisture_pin),
            ("dht_pin", self.dht_pin),
            ("rain_pin", self.rain_pin),
            ("water_level_pin", self.water_level_pin),
            ("pump_relay_pin", self.pump_relay_pin),
            ("led_red_pin", self.led_red_pin),
            ("led_green_pin", self.led_green_pin),
            ("led_yellow_pin", self.led_yellow_pin),
            ("led_white_pin", self.led_white_pin),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IrrigationSettings {
    pub check_interval_sec: u64,
    pub duration_sec: u64,
    pub daily_quota_sec: u64,
    pub min_water_level_pct: u8,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub max_air_humidity_pct: u8,
    pub min_interval_sec: u64,
    pub rain_lock: bool,
    pub retain_days: u32,
}

impl Default for IrrigationSettings {
    fn default() -> Self {
        Self {
            check_interval_sec: 300,
            duration_sec: 30,
            daily_quota_sec: 300,
            min_water_level_pct: 20,
            min_temp_c: 10.0,
            max_temp_c: 32.0,
            max_air_humidity_pct: 85,
            min_interval_sec: 3600,
            rain_lock: true,
            retain_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantProfile {
    pub name: String,
    pub soil_type: String,
    pub min_moisture_pct: u8,
    pub optimal_moisture_pct: u8,
    pub max_moisture_pct: u8,
}

impl Default for PlantProfile {
    fn default() -> Self {
        Self {
            name: "Tomato".to_string(),
            soil_type: "loam".to_string(),
            min_moisture_pct: 40,
            optimal_moisture_pct: 60,
            max_moisture_pct: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalConfig {
    pub db_path: String,
    pub log_level: String,
    pub watchdog_margin_sec: u64,
    pub watchdog_interval_sec: u64,
    pub prune_interval_ticks: u32,
    pub network_probe_host: String,
    pub network_probe_port: u16,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            db_path: "irrigation.db".to_string(),
            log_level: "info".to_string(),
            watchdog_margin_sec: 30,
            watchdog_interval_sec: 5,
            prune_interval_ticks: 10,
            network_probe_host: "8.8.8.8".to_string(),
            network_probe_port: 53,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pins: PinConfig,
    pub irrigation: IrrigationSettings,
    pub plant: PlantProfile,
    pub operational: OperationalConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Overlay recognized environment variables on top of `self`.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = env::var("IRRIGATION_DB_PATH") {
            self.operational.db_path = v;
        }
        if let Ok(v) = env::var("IRRIGATION_LOG") {
            self.operational.log_level = v;
        }
        if let Some(v) = env::var("IRRIGATION_CHECK_INTERVAL_SEC")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.irrigation.check_interval_sec = v;
        }
        if let Some(v) = env::var("IRRIGATION_DURATION_SEC")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.irrigation.duration_sec = v;
        }
        if let Some(v) = env::var("IRRIGATION_WATCHDOG_MARGIN_SEC")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.operational.watchdog_margin_sec = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let entries = self.pins.entries();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                if entries[i].1 == entries[j].1 {
                    return Err(ConfigError::DuplicatePin {
                        pin: entries[i].1,
                        first: entries[i].0,
                        second: entries[j].0,
                    });
                }
            }
        }

        if self.irrigation.min_temp_c >= self.irrigation.max_temp_c {
            return Err(ConfigError::InvalidThreshold(format!(
                "min_temp_c ({}) must be < max_temp_c ({})",
                self.irrigation.min_temp_c, self.irrigation.max_temp_c
            )));
        }
        if self.irrigation.min_water_level_pct > 100 {
            return Err(ConfigError::InvalidThreshold(
                "min_water_level_pct must be <= 100".to_string(),
            ));
        }
        if self.irrigation.max_air_humidity_pct > 100 {
            return Err(ConfigError::InvalidThreshold(
                "max_air_humidity_pct must be <= 100".to_string(),
            ));
        }
        if self.plant.min_moisture_pct >= self.plant.optimal_moisture_pct
            || self.plant.optimal_moisture_pct > self.plant.max_moisture_pct
        {
            return Err(ConfigError::InvalidThreshold(format!(
                "plant moisture thresholds must satisfy min < optimal <= max (got {}/{}/{})",
                self.plant.min_moisture_pct, self.plant.optimal_moisture_pct, self.plant.max_moisture_pct
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn duplicate_pin_rejected() {
        let mut cfg = Config::default();
        cfg.pins.dht_pin = cfg.pins.soil_moisture_pin;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePin { .. }));
    }

    #[test]
    fn inverted_temp_thresholds_rejected() {
        let mut cfg = Config::default();
        cfg.irrigation.min_temp_c = 40.0;
        cfg.irrigation.max_temp_c = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn plant_thresholds_out_of_order_rejected() {
        let mut cfg = Config::default();
        cfg.plant.min_moisture_pct = 70;
        cfg.plant.optimal_moisture_pct = 60;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_parses_minimal_toml() {
        let dir = std::env::temp_dir().join(format!("irrigation-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[irrigation]\nduration_sec = 45\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.irrigation.duration_sec, 45);
        assert_eq!(cfg.irrigation.check_interval_sec, 300);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn apply_env_overlays_check_interval() {
        std::env::set_var("IRRIGATION_CHECK_INTERVAL_SEC", "42");
        let cfg = Config::default().apply_env();
        assert_eq!(cfg.irrigation.check_interval_sec, 42);
        std::env::remove_var("IRRIGATION_CHECK_INTERVAL_SEC");
    }
}
