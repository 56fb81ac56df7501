//! Entry point: reads config, opens the event store, claims every GPIO
//! pin, and wires up the controller loop, watchdog, and manual-trigger
//! channel.
//!
//! Safety features:
//! - Signal handler: SIGTERM/SIGINT -> pump off, LEDs off before exit
//! - Pump watchdog: force-stops a run that overstays its requested duration
//! - Event store pruning on a fixed tick interval
//! - Config validation (duplicate pins, inverted thresholds) before any pin
//!   is claimed

mod actuators;
mod config;
mod controller;
mod decision;
mod error;
mod hal;
mod hooks;
mod network;
mod sensors;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use actuators::{LedSet, Pump};
use config::Config;
use controller::Controller;
use hal::Hal;
use hooks::{event_subscription_channel, manual_trigger_channel, new_shutdown_token};
use network::NetworkProbe;
use sensors::{
    AirClimateDriver, RainDriver, SensorDriver, SensorManager, SoilMoistureDriver, WaterLevelDriver,
};
use state::new_shared_state;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::var("IRRIGATION_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("irrigation.toml"));

    let config = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(error::ConfigError::Io(_)) => {
            info!(path = %config_path.display(), "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(error = %e, "failed to load config");
            return Err(e.into());
        }
    };
    let config = config.apply_env();
    config.validate().context("invalid configuration")?;

    let store = Store::connect(&format!("sqlite://{}", config.operational.db_path))
        .await
        .context("failed to connect to event store")?;
    store.migrate().await.context("failed to run migrations")?;

    let hal = Hal::new().context("failed to initialize GPIO")?;
    let pins = &config.pins;
    hal.claim_output(pins.pump_relay_pin, false, "pump").await?;
    hal.claim_output(pins.led_red_pin, false, "led_red").await?;
    hal.claim_output(pins.led_green_pin, false, "led_green").await?;
    hal.claim_output(pins.led_yellow_pin, false, "led_yellow").await?;
    hal.claim_output(pins.led_white_pin, false, "led_white").await?;

    let mut sensors = SensorManager::new();
    let mut soil = SoilMoistureDriver::new(hal.clone(), pins.soil_moisture_pin);
    soil.setup().await.context("failed to set up soil moisture sensor")?;
    sensors.register(Box::new(soil));

    let mut rain = RainDriver::new(hal.clone(), pins.rain_pin);
    rain.setup().await.context("failed to set up rain sensor")?;
    sensors.register(Box::new(rain));

    let mut water = WaterLevelDriver::new(hal.clone(), pins.water_level_pin, pins.water_level_active_low);
    water.setup().await.context("failed to set up water level sensor")?;
    sensors.register(Box::new(water));

    let mut air = AirClimateDriver::new(hal.clone(), pins.dht_pin);
    air.setup().await.context("failed to set up air climate sensor")?;
    sensors.register(Box::new(air));

    let pump = Arc::new(Mutex::new(Pump::new(
        hal.clone(),
        pins.pump_relay_pin,
        pins.active_low,
    )));
    let leds = LedSet::new(
        hal.clone(),
        pins.led_red_pin,
        pins.led_green_pin,
        pins.led_yellow_pin,
        pins.led_white_pin,
        pins.active_low,
    );
    let state = new_shared_state();
    let network = NetworkProbe::new(
        config.operational.network_probe_host.clone(),
        config.operational.network_probe_port,
        config.operational.network_probe_host.clone(),
    );

    let shutdown = new_shutdown_token();
    // No transport (CLI/API) lives in this crate yet; `_manual_tx` and
    // `_events_rx` are what a future one would hold onto.
    let (_manual_tx, manual_rx) = manual_trigger_channel(8);
    let (events_tx, _events_rx) = event_subscription_channel(64);

    let stop_handle = pump.lock().await.stop_handle();
    let watchdog = controller::spawn_watchdog(
        pump.clone(),
        stop_handle,
        std::time::Duration::from_secs(config.operational.watchdog_interval_sec),
        std::time::Duration::from_secs(config.operational.watchdog_margin_sec),
        shutdown.clone(),
    );

    let mut ctl = Controller::new(
        hal.clone(),
        sensors,
        pump,
        leds,
        state,
        store,
        network,
        config.irrigation.clone(),
        config.plant.clone(),
        shutdown.clone(),
        manual_rx,
        events_tx,
        config.operational.prune_interval_ticks,
        config.irrigation.retain_days,
    );

    let controller_shutdown = shutdown.clone();
    let controller_task = tokio::spawn(async move {
        ctl.run().await;
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_reason = tokio::select! {
        _ = &mut ctrl_c => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    info!(signal = exit_reason, "shutdown signal received");
    controller_shutdown.cancel();

    if tokio::time::timeout(std::time::Duration::from_secs(5), controller_task)
        .await
        .is_err()
    {
        warn!("controller task did not exit within the grace period");
    }

    shutdown.cancel();
    let _ = watchdog.await;

    info!("shutdown complete");
    Ok(())
}
