//! Pump relay and LED set, both built on top of the HAL. The pump's wait
//! is cancellable so a manual stop or shutdown can preempt an in-progress
//! automatic run instead of blocking the controller loop on a bare sleep.

use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PumpError;
use crate::hal::{Hal, WeakHal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStopReason {
    DurationElapsed,
    ManualStop,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct PumpRunResult {
    pub elapsed_sec: u64,
    pub stop_reason: PumpStopReason,
}

/// Cloneable external view of a pump's in-progress run, used by callers
/// (manual-stop hook, shutdown) that need to signal a stop without going
/// through whatever lock guards the `Pump` itself.
#[derive(Clone, Default)]
pub struct PumpStopHandle {
    token: std::sync::Arc<std::sync::Mutex<Option<CancellationToken>>>,
}

impl PumpStopHandle {
    pub fn request_stop(&self) {
        if let Some(token) = self.token.lock().unwrap().as_ref() {
            token.cancel();
        }
    }
}

/// Translate a logical on/off into the physical level to write, given the
/// board's polarity (many relay boards are active-low: LOW = on).
fn physical_level(active_low: bool, on: bool) -> bool {
    if active_low {
        !on
    } else {
        on
    }
}

pub struct Pump {
    hal: WeakHal,
    relay_pin: u8,
    active_low: bool,
    is_running: bool,
    total_run_time: Duration,
    last_start_at: Option<OffsetDateTime>,
    stop_handle: PumpStopHandle,
}

impl Pump {
    pub fn new(hal: Hal, relay_pin: u8, active_low: bool) -> Self {
        Self {
            hal: hal.downgrade(),
            relay_pin,
            active_low,
            is_running: false,
            total_run_time: Duration::ZERO,
            last_start_at: None,
            stop_handle: PumpStopHandle::default(),
        }
    }

    /// A cheap, cloneable handle that can cancel the currently-running
    /// pump cycle (if any) from another task.
    pub fn stop_handle(&self) -> PumpStopHandle {
        self.stop_handle.clone()
    }

    /// Convenience for callers that already hold the `Pump` directly
    /// (e.g. the shutdown sequence); equivalent to `stop_handle().request_stop()`.
    pub fn request_stop(&self) {
        self.stop_handle.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn total_run_time(&self) -> Duration {
        self.total_run_time
    }

    pub fn last_start_at(&self) -> Option<OffsetDateTime> {
        self.last_start_at
    }

    /// Turn the relay on, wait for `duration` (or forever if zero, i.e. a
    /// manual hold), and return once stopped — by elapsed duration,
    /// `request_stop`, or `shutdown_token` cancellation. The wait itself
    /// never blocks the HAL: other consumers can still read/write other
    /// pins while this future is pending.
    pub async fn start(
        &mut self,
        duration: Duration,
        shutdown_token: &CancellationToken,
    ) -> Result<PumpRunResult, PumpError> {
        if self.is_running {
            return Err(PumpError::PumpBusy);
        }

        self.hal
            .upgrade_or_err()
            .map_err(PumpError::RelayWrite)?
            .write(self.relay_pin, physical_level(self.active_low, true))
            .await
            .map_err(PumpError::RelayWrite)?;
        self.is_running = true;
        self.last_start_at = Some(OffsetDateTime::now_utc());
        let started = std::time::Instant::now();
        info!(pin = self.relay_pin, ?duration, "pump started");

        let stop_token = CancellationToken::new();
        *self.stop_handle.token.lock().unwrap() = Some(stop_token.clone());

        let stop_reason = if duration.is_zero() {
            tokio::select! {
                _ = stop_token.cancelled() => PumpStopReason::ManualStop,
                _ = shutdown_token.cancelled() => PumpStopReason::Shutdown,
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(duration) => PumpStopReason::DurationElapsed,
                _ = stop_token.cancelled() => PumpStopReason::ManualStop,
                _ = shutdown_token.cancelled() => PumpStopReason::Shutdown,
            }
        };

        let elapsed = started.elapsed();
        self.drive_low().await?;
        self.total_run_time += elapsed;
        self.is_running = false;
        *self.stop_handle.token.lock().unwrap() = None;

        info!(elapsed_sec = elapsed.as_secs(), ?stop_reason, "pump stopped");
        Ok(PumpRunResult {
            elapsed_sec: elapsed.as_secs(),
            stop_reason,
        })
    }

    async fn drive_low(&mut self) -> Result<(), PumpError> {
        self.hal
            .upgrade_or_err()
            .map_err(PumpError::RelayWrite)?
            .write(self.relay_pin, physical_level(self.active_low, false))
            .await
            .map_err(PumpError::RelayWrite)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    Red,
    Green,
    Yellow,
    White,
}

pub struct LedSet {
    hal: WeakHal,
    pins: std::collections::HashMap<Led, u8>,
    active_low: bool,
}

impl LedSet {
    pub fn new(hal: Hal, red: u8, green: u8, yellow: u8, white: u8, active_low: bool) -> Self {
        let mut pins = std::collections::HashMap::new();
        pins.insert(Led::Red, red);
        pins.insert(Led::Green, green);
        pins.insert(Led::Yellow, yellow);
        pins.insert(Led::White, white);
        Self { hal: hal.downgrade(), pins, active_low }
    }

    fn pin(&self, led: Led) -> u8 {
        self.pins[&led]
    }

    pub async fn set_steady(&self, led: Led, on: bool) {
        let Some(hal) = self.hal.upgrade() else {
            warn!(?led, "failed to set LED steady state: HAL released");
            return;
        };
        let level = physical_level(self.active_low, on);
        if let Err(e) = hal.set_steady(self.pin(led), level).await {
            warn!(?led, error = %e, "failed to set LED steady state");
        }
    }

    /// Blink alternates the physical level every `interval`, starting from
    /// the "on" level for this board's polarity.
    pub async fn blink(&self, led: Led, interval: Duration) {
        let Some(hal) = self.hal.upgrade() else {
            warn!(?led, "failed to start blink: HAL released");
            return;
        };
        hal.start_blink(self.pin(led), interval, physical_level(self.active_low, true)).await;
    }

    pub async fn all_off(&self) {
        for led in [Led::Red, Led::Green, Led::Yellow, Led::White] {
            self.set_steady(led, false).await;
        }
    }
}
