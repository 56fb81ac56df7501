//! The supervisory loop: sample -> decide -> act -> persist, plus the
//! status/LED state machine and an independent watchdog.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actuators::{Led, LedSet, Pump, PumpStopHandle};
use crate::config::{IrrigationSettings, PlantProfile};
use crate::decision::{self, DecisionContext, IrrigationDecision, ReasonCode};
use crate::hal::Hal;
use crate::hooks::{
    CommittedEvent, ManualTriggerOptions, ManualTriggerOutcome, ManualTriggerReceiver,
};
use crate::network::{NetworkProbe, NetworkStatus};
use crate::sensors::SensorManager;
use crate::state::{SharedState, StatusTag};
use crate::store::{AlertKind, Outcome, Store, Trigger};

pub struct Controller {
    hal: Hal,
    sensors: SensorManager,
    pump: Arc<Mutex<Pump>>,
    leds: LedSet,
    state: SharedState,
    store: Store,
    network: NetworkProbe,
    settings: IrrigationSettings,
    plant: PlantProfile,
    shutdown: CancellationToken,
    manual_rx: ManualTriggerReceiver,
    events_tx: tokio::sync::broadcast::Sender<CommittedEvent>,
    prune_interval_ticks: u32,
    retain_days: u32,
    tick_count: u32,
    last_offline: bool,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hal: Hal,
        sensors: SensorManager,
        pump: Arc<Mutex<Pump>>,
        leds: LedSet,
        state: SharedState,
        store: Store,
        network: NetworkProbe,
        settings: IrrigationSettings,
        plant: PlantProfile,
        shutdown: CancellationToken,
        manual_rx: ManualTriggerReceiver,
        events_tx: tokio::sync::broadcast::Sender<CommittedEvent>,
        prune_interval_ticks: u32,
        retain_days: u32,
    ) -> Self {
        Self {
            hal,
            sensors,
            pump,
            leds,
            state,
            store,
            network,
            settings,
            plant,
            shutdown,
            manual_rx,
            events_tx,
            prune_interval_ticks,
            retain_days,
            tick_count: 0,
            last_offline: false,
        }
    }

    pub async fn run(&mut self) {
        loop {
            let sleep = tokio::time::sleep(StdDuration::from_secs(self.settings.check_interval_sec));
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received, exiting controller loop");
                    break;
                }
                Some(request) = self.manual_rx.recv() => {
                    self.handle_manual(request.options, request.reply).await;
                }
                _ = sleep => {
                    let offline = self.network.probe().await == NetworkStatus::Offline;
                    self.tick(offline).await;
                }
            }
        }
        self.shutdown_sequence().await;
    }

    async fn handle_manual(
        &mut self,
        options: ManualTriggerOptions,
        reply: tokio::sync::oneshot::Sender<ManualTriggerOutcome>,
    ) {
        let ctx = self.build_context(true, options).await;
        let decision = {
            let state = self.state.read().await;
            decision::evaluate(&state, &self.plant, &self.settings, &ctx)
        };

        let outcome = match decision {
            IrrigationDecision::Irrigate { duration_sec, reason } => {
                ManualTriggerOutcome::Accepted { reason, duration_sec }
            }
            IrrigationDecision::Skip { reason } => ManualTriggerOutcome::Rejected { reason },
        };
        let _ = reply.send(outcome);

        if let IrrigationDecision::Irrigate { duration_sec, reason } = decision {
            self.run_irrigation(duration_sec, reason, Trigger::Manual).await;
        }
    }

    async fn tick(&mut self, offline: bool) {
        self.last_offline = offline;
        self.state
            .write()
            .await
            .set_status(if offline { StatusTag::Offline } else { StatusTag::Online });
        self.leds.set_steady(Led::White, offline).await;

        let (readings, report) = self.sensors.read_all().await;
        for reading in readings.values() {
            if let Err(e) = self.store.insert_reading(reading).await {
                warn!(error = %e, "failed to persist sensor reading");
            }
            self.state.write().await.record_reading(reading.clone());
        }
        for kind in &report.failed {
            let message = format!("{kind:?} read failed");
            self.raise_alert(AlertKind::SensorError, &message, Some(&format!("{kind:?}"))).await;
        }

        let ctx = self.build_context(false, ManualTriggerOptions::default()).await;
        let decision = {
            let state = self.state.read().await;
            decision::evaluate(&state, &self.plant, &self.settings, &ctx)
        };

        match decision {
            IrrigationDecision::Irrigate { duration_sec, reason } => {
                self.run_irrigation(duration_sec, reason, Trigger::Auto).await;
            }
            IrrigationDecision::Skip { reason } => self.apply_skip(reason).await,
        }

        self.tick_count += 1;
        if self.prune_interval_ticks > 0 && self.tick_count % self.prune_interval_ticks == 0 {
            if let Err(e) = self.store.prune(OffsetDateTime::now_utc(), self.retain_days).await {
                warn!(error = %e, "prune failed");
            }
        }
    }

    async fn build_context(&self, manual: bool, options: ManualTriggerOptions) -> DecisionContext {
        let now = OffsetDateTime::now_utc();
        let today_irrigation_sec = self
            .store
            .today_irrigation_seconds(now)
            .await
            .unwrap_or(0);
        let last_irrigation_at = self
            .store
            .last_irrigation()
            .await
            .ok()
            .flatten()
            .and_then(|row| {
                time::OffsetDateTime::parse(&row.timestamp, &time::format_description::well_known::Rfc3339).ok()
            });

        DecisionContext {
            now,
            last_irrigation_at,
            today_irrigation_sec,
            offline_mode: self.last_offline,
            manual,
            override_soil: options.override_soil,
            manual_duration_sec: options.duration_sec,
        }
    }

    async fn run_irrigation(&mut self, duration_sec: u64, reason: ReasonCode, trigger: Trigger) {
        self.state.write().await.set_status(StatusTag::Irrigating);
        self.leds.blink(Led::Yellow, StdDuration::from_millis(500)).await;

        let result = {
            let mut pump = self.pump.lock().await;
            pump.start(StdDuration::from_secs(duration_sec), &self.shutdown).await
        };

        let now = OffsetDateTime::now_utc();
        match result {
            Ok(run) => {
                let _ = self
                    .store
                    .append_irrigation_event(now, run.elapsed_sec, reason, trigger, Outcome::Success)
                    .await;
                self.events_tx.send(CommittedEvent::Irrigation {
                    timestamp: now,
                    duration_sec: run.elapsed_sec,
                    reason,
                }).ok();
                self.state.write().await.set_status(StatusTag::Idle);
                self.leds.set_steady(Led::Yellow, false).await;
                self.refresh_sensor_leds().await;
            }
            Err(e) => {
                error!(error = %e, "pump failed");
                let _ = self
                    .store
                    .append_irrigation_event(now, 0, reason, trigger, Outcome::Failure)
                    .await;
                self.raise_alert(AlertKind::PumpFailure, &e.to_string(), Some("pump")).await;
                self.state.write().await.set_status(StatusTag::Error);
                self.leds.blink(Led::Red, StdDuration::from_millis(300)).await;
            }
        }
    }

    async fn apply_skip(&mut self, reason: ReasonCode) {
        match reason {
            ReasonCode::RainDetected => {
                self.state.write().await.set_status(StatusTag::Raining);
            }
            ReasonCode::LowWater => {
                self.state.write().await.set_status(StatusTag::NoWater);
                self.leds.set_steady(Led::Red, true).await;
                self.raise_alert(AlertKind::LowWater, "water level below minimum", None).await;
            }
            ReasonCode::DailyLimit | ReasonCode::MinInterval | ReasonCode::Waiting => {
                self.state.write().await.set_status(StatusTag::Idle);
            }
            ReasonCode::TempTooLow | ReasonCode::TempTooHigh | ReasonCode::AirTooHumid => {
                self.state.write().await.set_status(StatusTag::Warning);
            }
            ReasonCode::SoilOk => {
                self.state.write().await.set_status(StatusTag::Idle);
                self.leds.set_steady(Led::Green, true).await;
            }
            ReasonCode::NoSoilData | ReasonCode::Manual | ReasonCode::SoilTooDry => {
                self.state.write().await.set_status(StatusTag::Idle);
            }
        }
    }

    async fn refresh_sensor_leds(&self) {
        let state = self.state.read().await;
        let ok = !state.soil_is_dry(self.plant.min_moisture_pct);
        drop(state);
        self.leds.set_steady(Led::Green, ok).await;
    }

    async fn raise_alert(&self, kind: AlertKind, message: &str, source: Option<&str>) {
        let now = OffsetDateTime::now_utc();
        if let Err(e) = self.store.append_alert(now, kind, message, source).await {
            warn!(error = %e, "failed to persist alert");
        }
        self.events_tx
            .send(CommittedEvent::Alert { timestamp: now, message: message.to_string() })
            .ok();
    }

    async fn shutdown_sequence(&mut self) {
        info!("running shutdown sequence");
        self.pump.lock().await.request_stop();
        // give the pump's own select! a beat to observe the cancellation
        // and drive the relay low before we move on.
        tokio::task::yield_now().await;
        self.leds.all_off().await;
        self.sensors.cleanup_all().await;
        self.hal.shutdown().await;
        info!("shutdown sequence complete");
    }
}

/// Independent safety net: force-stops the pump if it runs longer than
/// its requested duration plus a margin, regardless of the controller
/// loop's own health.
pub fn spawn_watchdog(
    pump: Arc<Mutex<Pump>>,
    stop_handle: PumpStopHandle,
    check_interval: StdDuration,
    margin: StdDuration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let (running, started_at) = {
                        let p = pump.lock().await;
                        (p.is_running(), p.last_start_at())
                    };
                    if running {
                        if let Some(started_at) = started_at {
                            let elapsed = (OffsetDateTime::now_utc() - started_at).unsigned_abs();
                            if elapsed > margin {
                                warn!("watchdog force-stopping pump: exceeded safety margin");
                                stop_handle.request_stop();
                            }
                        }
                    }
                }
            }
        }
    })
}
