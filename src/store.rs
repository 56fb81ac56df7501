//! Append-only local persistence over SQLite: sensor readings, irrigation
//! events, alerts. Opened in WAL mode with a short exclusive lock per
//! write and shared reads, so the controller loop and external hooks
//! (manual trigger, status query) can use the same handle concurrently.

use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::decision::ReasonCode;
use crate::error::StoreError;
use crate::state::SensorReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Auto,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Auto => "auto",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct IrrigationEventRow {
    pub timestamp: String,
    pub duration_sec: i64,
    pub reason_code: String,
    pub trigger: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    SensorError,
    LowWater,
    PumpFailure,
    SystemError,
}

impl AlertKind {
    fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SensorError => "sensor_error",
            AlertKind::LowWater => "low_water",
            AlertKind::PumpFailure => "pump_failure",
            AlertKind::SystemError => "system_error",
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("journal_mode", "WAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("event store migrated");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn insert_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        let ts = reading.at().format(&Rfc3339).unwrap_or_default();
        let (temperature, air_humidity, soil_moisture, soil_is_dry, water_level, water_detected, rain_detected) =
            match reading {
                SensorReading::SoilMoisture { percent, is_dry, .. } => {
                    (None, None, Some(*percent as i64), Some(*is_dry), None, None, None)
                }
                SensorReading::Rain { detected, .. } => (None, None, None, None, None, None, Some(*detected)),
                SensorReading::WaterLevel { percent, detected, .. } => {
                    (None, None, None, None, Some(*percent as i64), Some(*detected), None)
                }
                SensorReading::AirClimate { temperature_c, humidity_pct, .. } => {
                    (Some(*temperature_c as f64), Some(*humidity_pct as i64), None, None, None, None, None)
                }
            };

        sqlx::query(
            "INSERT INTO sensor_readings
                (timestamp, temperature, air_humidity, soil_moisture, soil_is_dry, water_level, water_detected, rain_detected, simulated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ts)
        .bind(temperature)
        .bind(air_humidity)
        .bind(soil_moisture)
        .bind(soil_is_dry)
        .bind(water_level)
        .bind(water_detected)
        .bind(rain_detected)
        .bind(reading.simulated())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_irrigation_event(
        &self,
        timestamp: OffsetDateTime,
        duration_sec: u64,
        reason: ReasonCode,
        trigger: Trigger,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let ts = timestamp.format(&Rfc3339).unwrap_or_default();
        sqlx::query(
            "INSERT INTO irrigation_events (timestamp, duration, reason_code, triggered_by, success)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ts)
        .bind(duration_sec as i64)
        .bind(reason.as_str())
        .bind(trigger.as_str())
        .bind(matches!(outcome, Outcome::Success))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_alert(
        &self,
        timestamp: OffsetDateTime,
        kind: AlertKind,
        message: &str,
        source: Option<&str>,
    ) -> Result<(), StoreError> {
        let ts = timestamp.format(&Rfc3339).unwrap_or_default();
        sqlx::query(
            "INSERT INTO alerts (timestamp, alert_type, message, sensor_name, resolved)
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(ts)
        .bind(kind.as_str())
        .bind(message)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sum of `duration` for successful irrigation events whose day
    /// (in UTC) matches `today`'s date.
    pub async fn today_irrigation_seconds(&self, today: OffsetDateTime) -> Result<u64, StoreError> {
        let day_start = today
            .replace_time(time::Time::MIDNIGHT)
            .format(&Rfc3339)
            .unwrap_or_default();
        let day_end = (today + time::Duration::days(1))
            .replace_time(time::Time::MIDNIGHT)
            .format(&Rfc3339)
            .unwrap_or_default();

        let row = sqlx::query(
            "SELECT COALESCE(SUM(duration), 0) as total FROM irrigation_events
             WHERE success = 1 AND timestamp >= ? AND timestamp < ?",
        )
        .bind(day_start)
        .bind(day_end)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    pub async fn last_irrigation(&self) -> Result<Option<IrrigationEventRow>, StoreError> {
        let row = sqlx::query(
            "SELECT timestamp, duration, reason_code, triggered_by, success
             FROM irrigation_events ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IrrigationEventRow {
            timestamp: r.get("timestamp"),
            duration_sec: r.get("duration"),
            reason_code: r.get("reason_code"),
            trigger: r.get("triggered_by"),
            outcome: if r.get::<bool, _>("success") { "success".into() } else { "failure".into() },
        }))
    }

    pub async fn recent_sensor_readings(&self, limit: i64) -> Result<Vec<(String, String)>, StoreError> {
        let rows = sqlx::query("SELECT timestamp, device_id FROM sensor_readings ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("timestamp"), r.get("device_id")))
            .collect())
    }

    /// Delete rows older than `days` from readings/events, mark older
    /// alerts resolved instead of deleting them.
    pub async fn prune(&self, now: OffsetDateTime, days: u32) -> Result<(), StoreError> {
        let cutoff = (now - time::Duration::days(days as i64))
            .format(&Rfc3339)
            .unwrap_or_default();

        let deleted_readings = sqlx::query("DELETE FROM sensor_readings WHERE timestamp < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let deleted_events = sqlx::query("DELETE FROM irrigation_events WHERE timestamp < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        sqlx::query("UPDATE alerts SET resolved = 1 WHERE timestamp < ? AND resolved = 0")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;

        if deleted_readings > 0 || deleted_events > 0 {
            info!(deleted_readings, deleted_events, "pruned event store");
        }
        Ok(())
    }

    /// Atomic backup via VACUUM INTO, mirroring the hardware's
    /// SD-card-wear mitigation pattern: write to a temp path, then rename.
    pub async fn backup(&self, dest_path: &str) -> Result<(), StoreError> {
        let tmp_path = format!("{dest_path}.tmp");
        sqlx::query(&format!("VACUUM INTO '{tmp_path}'"))
            .execute(&self.pool)
            .await?;
        if let Err(e) = std::fs::rename(&tmp_path, dest_path) {
            warn!(error = %e, "backup rename failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    async fn memory_store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn migrate_then_health_check_ok() {
        let store = memory_store().await;
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn insert_and_recall_sensor_reading() {
        let store = memory_store().await;
        store
            .insert_reading(&SensorReading::SoilMoisture {
                percent: 42,
                is_dry: false,
                at: OffsetDateTime::now_utc(),
                simulated: true,
            })
            .await
            .unwrap();
        let rows = store.recent_sensor_readings(10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn today_irrigation_seconds_sums_only_success_today() {
        let store = memory_store().await;
        let now = datetime!(2026-01-01 12:00:00 UTC);
        store
            .append_irrigation_event(now, 5, ReasonCode::SoilTooDry, Trigger::Auto, Outcome::Success)
            .await
            .unwrap();
        store
            .append_irrigation_event(now, 5, ReasonCode::SoilTooDry, Trigger::Auto, Outcome::Failure)
            .await
            .unwrap();
        store
            .append_irrigation_event(
                now - time::Duration::days(2),
                99,
                ReasonCode::SoilTooDry,
                Trigger::Auto,
                Outcome::Success,
            )
            .await
            .unwrap();

        let total = store.today_irrigation_seconds(now).await.unwrap();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn last_irrigation_returns_most_recent() {
        let store = memory_store().await;
        let now = datetime!(2026-01-01 12:00:00 UTC);
        store
            .append_irrigation_event(now, 5, ReasonCode::SoilTooDry, Trigger::Auto, Outcome::Success)
            .await
            .unwrap();
        store
            .append_irrigation_event(
                now + time::Duration::minutes(5),
                7,
                ReasonCode::Manual,
                Trigger::Manual,
                Outcome::Success,
            )
            .await
            .unwrap();

        let last = store.last_irrigation().await.unwrap().unwrap();
        assert_eq!(last.duration_sec, 7);
        assert_eq!(last.trigger, "manual");
    }

    #[tokio::test]
    async fn prune_deletes_old_rows_and_resolves_old_alerts() {
        let store = memory_store().await;
        let old = datetime!(2020-01-01 00:00:00 UTC);
        let now = datetime!(2026-01-01 00:00:00 UTC);

        store
            .insert_reading(&SensorReading::Rain { detected: false, at: old, simulated: true })
            .await
            .unwrap();
        store
            .append_irrigation_event(old, 5, ReasonCode::SoilTooDry, Trigger::Auto, Outcome::Success)
            .await
            .unwrap();
        store
            .append_alert(old, AlertKind::LowWater, "tank low", None)
            .await
            .unwrap();

        store.prune(now, 7).await.unwrap();

        assert!(store.recent_sensor_readings(10).await.unwrap().is_empty());
        assert!(store.last_irrigation().await.unwrap().is_none());
    }
}
