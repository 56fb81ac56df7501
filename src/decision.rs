//! Pure decision engine. `evaluate` takes no locks and performs no I/O; it
//! is a function of its four inputs only, so every branch is exercised by
//! plain unit tests without any async runtime.

use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{IrrigationSettings, PlantProfile};
use crate::state::{SensorKind, SensorReading, SystemState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    RainDetected,
    LowWater,
    DailyLimit,
    MinInterval,
    TempTooLow,
    TempTooHigh,
    AirTooHumid,
    NoSoilData,
    SoilOk,
    SoilTooDry,
    Waiting,
    Manual,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RainDetected => "RAIN_DETECTED",
            ReasonCode::LowWater => "LOW_WATER",
            ReasonCode::DailyLimit => "DAILY_LIMIT",
            ReasonCode::MinInterval => "MIN_INTERVAL",
            ReasonCode::TempTooLow => "TEMP_TOO_LOW",
            ReasonCode::TempTooHigh => "TEMP_TOO_HIGH",
            ReasonCode::AirTooHumid => "AIR_TOO_HUMID",
            ReasonCode::NoSoilData => "NO_SOIL_DATA",
            ReasonCode::SoilOk => "SOIL_OK",
            ReasonCode::SoilTooDry => "SOIL_TOO_DRY",
            ReasonCode::Waiting => "WAITING",
            ReasonCode::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrrigationDecision {
    Irrigate { duration_sec: u64, reason: ReasonCode },
    Skip { reason: ReasonCode },
}

impl IrrigationDecision {
    pub fn reason(&self) -> ReasonCode {
        match self {
            IrrigationDecision::Irrigate { reason, .. } => *reason,
            IrrigationDecision::Skip { reason } => *reason,
        }
    }
}

/// Per-tick inputs derived from the event store and the trigger source.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext {
    pub now: OffsetDateTime,
    pub last_irrigation_at: Option<OffsetDateTime>,
    pub today_irrigation_sec: u64,
    pub offline_mode: bool,
    pub manual: bool,
    pub override_soil: bool,
    pub manual_duration_sec: Option<u64>,
}

impl DecisionContext {
    pub fn automatic(now: OffsetDateTime, last_irrigation_at: Option<OffsetDateTime>, today_irrigation_sec: u64, offline_mode: bool) -> Self {
        Self {
            now,
            last_irrigation_at,
            today_irrigation_sec,
            offline_mode,
            manual: false,
            override_soil: false,
            manual_duration_sec: None,
        }
    }
}

pub fn evaluate(
    state: &SystemState,
    plant: &PlantProfile,
    settings: &IrrigationSettings,
    ctx: &DecisionContext,
) -> IrrigationDecision {
    use IrrigationDecision::{Irrigate, Skip};

    // Rule 1: rain lock, applies to every trigger including manual.
    if settings.rain_lock && state.is_raining() {
        return Skip { reason: ReasonCode::RainDetected };
    }

    // Rule 2: low water, fail-safe on missing data.
    let water_pct = match state.reading(SensorKind::WaterLevel) {
        Some(SensorReading::WaterLevel { percent, .. }) => *percent,
        _ => 0,
    };
    if water_pct < settings.min_water_level_pct {
        return Skip { reason: ReasonCode::LowWater };
    }

    // Rule 3: daily quota, evaluated before adding this run's duration.
    if ctx.today_irrigation_sec >= settings.daily_quota_sec {
        return Skip { reason: ReasonCode::DailyLimit };
    }

    // Rule 4: minimum cool-down. Bypassed under manual + override_soil.
    let bypass_min_interval = ctx.manual && ctx.override_soil;
    if !bypass_min_interval {
        if let Some(last) = ctx.last_irrigation_at {
            let elapsed = (ctx.now - last).whole_seconds().max(0) as u64;
            if elapsed < settings.min_interval_sec {
                return Skip { reason: ReasonCode::MinInterval };
            }
        }
    }

    // Rules 5-7: air climate. Absence of the field skips that rule only.
    if let Some(SensorReading::AirClimate { temperature_c, humidity_pct, .. }) =
        state.reading(SensorKind::AirClimate)
    {
        if *temperature_c < settings.min_temp_c {
            return Skip { reason: ReasonCode::TempTooLow };
        }
        if *temperature_c > settings.max_temp_c {
            return Skip { reason: ReasonCode::TempTooHigh };
        }
        if *humidity_pct > settings.max_air_humidity_pct {
            return Skip { reason: ReasonCode::AirTooHumid };
        }
    }

    // Rules 8-11: soil moisture.
    let soil_pct = match state.reading(SensorKind::SoilMoisture) {
        Some(SensorReading::SoilMoisture { percent, .. }) => Some(*percent),
        _ => None,
    };

    let duration = if ctx.manual {
        ctx.manual_duration_sec.unwrap_or(settings.duration_sec)
    } else {
        settings.duration_sec
    };
    let reason = if ctx.manual { ReasonCode::Manual } else { ReasonCode::SoilTooDry };

    match soil_pct {
        // Rule 8 (NoSoilData) is not one of the gates override_soil bypasses;
        // it always applies, manual or not.
        None => Skip { reason: ReasonCode::NoSoilData },
        Some(pct) => {
            if ctx.manual && ctx.override_soil {
                return Irrigate { duration_sec: duration, reason };
            }
            if pct >= plant.optimal_moisture_pct {
                Skip { reason: ReasonCode::SoilOk }
            } else if pct < plant.min_moisture_pct {
                Irrigate { duration_sec: duration, reason }
            } else {
                Skip { reason: ReasonCode::Waiting }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn settings() -> IrrigationSettings {
        IrrigationSettings {
            check_interval_sec: 1,
            duration_sec: 5,
            daily_quota_sec: 15,
            min_water_level_pct: 20,
            min_temp_c: 10.0,
            max_temp_c: 32.0,
            max_air_humidity_pct: 85,
            min_interval_sec: 10,
            rain_lock: true,
            retain_days: 7,
        }
    }

    fn plant() -> PlantProfile {
        PlantProfile {
            name: "Tomato".into(),
            soil_type: "loam".into(),
            min_moisture_pct: 40,
            optimal_moisture_pct: 60,
            max_moisture_pct: 80,
        }
    }

    fn state_with(soil: Option<u8>, rain: bool, water: u8, air: Option<(f32, u8)>) -> SystemState {
        let mut state = SystemState::new();
        if let Some(pct) = soil {
            state.record_reading(SensorReading::SoilMoisture {
                percent: pct,
                is_dry: pct < 40,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            });
        }
        state.record_reading(SensorReading::Rain {
            detected: rain,
            at: OffsetDateTime::now_utc(),
            simulated: true,
        });
        state.record_reading(SensorReading::WaterLevel {
            percent: water,
            detected: water > 0,
            at: OffsetDateTime::now_utc(),
            simulated: true,
        });
        if let Some((temp, hum)) = air {
            state.record_reading(SensorReading::AirClimate {
                temperature_c: temp,
                humidity_pct: hum,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            });
        }
        state
    }

    fn ctx(now: OffsetDateTime, last: Option<OffsetDateTime>, today_sec: u64) -> DecisionContext {
        DecisionContext::automatic(now, last, today_sec, false)
    }

    #[test]
    fn scenario_1_dry_soil_clear_sky_tank_full_irrigates() {
        let state = state_with(Some(30), false, 80, Some((22.0, 50)));
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(
            decision,
            IrrigationDecision::Irrigate { duration_sec: 5, reason: ReasonCode::SoilTooDry }
        );
    }

    #[test]
    fn scenario_2_rain_detected_skips() {
        let state = state_with(Some(20), true, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::RainDetected });
    }

    #[test]
    fn scenario_3_tank_empty_skips_low_water() {
        let state = state_with(Some(20), false, 10, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::LowWater });
    }

    #[test]
    fn scenario_4_daily_quota_boundary_skips() {
        let state = state_with(Some(20), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 15));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::DailyLimit });
    }

    #[test]
    fn scenario_5_cooldown_then_allowed() {
        let state = state_with(Some(20), false, 80, None);
        let now = datetime!(2026-01-01 00:00:10 UTC);
        let last = now - time::Duration::seconds(4);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, Some(last), 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::MinInterval });

        let now2 = now + time::Duration::seconds(6);
        let decision2 = evaluate(&state, &plant(), &settings(), &ctx(now2, Some(last), 0));
        assert_eq!(
            decision2,
            IrrigationDecision::Irrigate { duration_sec: 5, reason: ReasonCode::SoilTooDry }
        );
    }

    #[test]
    fn scenario_6_manual_override_soil_bypasses_soil_ok() {
        let state = state_with(Some(70), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let mut c = ctx(now, None, 0);
        c.manual = true;
        c.override_soil = true;
        let decision = evaluate(&state, &plant(), &settings(), &c);
        assert_eq!(
            decision,
            IrrigationDecision::Irrigate { duration_sec: 5, reason: ReasonCode::Manual }
        );
    }

    #[test]
    fn manual_without_override_still_gates_on_soil_ok() {
        let state = state_with(Some(70), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let mut c = ctx(now, None, 0);
        c.manual = true;
        let decision = evaluate(&state, &plant(), &settings(), &c);
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::SoilOk });
    }

    #[test]
    fn rain_lock_applies_even_to_manual_override() {
        let state = state_with(Some(20), true, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let mut c = ctx(now, None, 0);
        c.manual = true;
        c.override_soil = true;
        let decision = evaluate(&state, &plant(), &settings(), &c);
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::RainDetected });
    }

    #[test]
    fn boundary_soil_equal_min_is_waiting_not_irrigate() {
        let state = state_with(Some(40), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::Waiting });
    }

    #[test]
    fn boundary_soil_equal_optimal_is_soil_ok() {
        let state = state_with(Some(60), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::SoilOk });
    }

    #[test]
    fn boundary_water_equal_minimum_is_allowed() {
        let state = state_with(Some(20), false, 20, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision.reason(), ReasonCode::SoilTooDry);
    }

    #[test]
    fn boundary_temperature_equal_thresholds_allowed() {
        let state = state_with(Some(20), false, 80, Some((10.0, 50)));
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision.reason(), ReasonCode::SoilTooDry);

        let state_hot = state_with(Some(20), false, 80, Some((32.0, 50)));
        let decision_hot = evaluate(&state_hot, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision_hot.reason(), ReasonCode::SoilTooDry);
    }

    #[test]
    fn missing_air_climate_does_not_block_irrigation() {
        let state = state_with(Some(20), false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision.reason(), ReasonCode::SoilTooDry);
    }

    #[test]
    fn missing_soil_data_skips() {
        let state = state_with(None, false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::NoSoilData });
    }

    #[test]
    fn missing_soil_data_skips_even_under_manual_override_soil() {
        let state = state_with(None, false, 80, None);
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let mut c = ctx(now, None, 0);
        c.manual = true;
        c.override_soil = true;
        let decision = evaluate(&state, &plant(), &settings(), &c);
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::NoSoilData });
    }

    #[test]
    fn missing_water_level_is_fail_safe_low() {
        let mut state = SystemState::new();
        state.record_reading(SensorReading::SoilMoisture {
            percent: 20,
            is_dry: true,
            at: OffsetDateTime::now_utc(),
            simulated: true,
        });
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let decision = evaluate(&state, &plant(), &settings(), &ctx(now, None, 0));
        assert_eq!(decision, IrrigationDecision::Skip { reason: ReasonCode::LowWater });
    }
}
