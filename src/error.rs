//! Typed error taxonomy. Each variant maps to a failure class in the
//! propagation policy: only `ConfigError` is fatal at startup, everything
//! else is tolerated at its component boundary and turned into an `Alert`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config value: {0}")]
    Missing(&'static str),
    #[error("duplicate pin assignment: gpio {pin} used by both {first} and {second}")]
    DuplicatePin {
        pin: u8,
        first: &'static str,
        second: &'static str,
    },
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HalError {
    #[error("pin {0} already claimed")]
    PinAlreadyClaimed(u8),
    #[error("pin {0} not claimed")]
    PinNotClaimed(u8),
    #[error("chip error: {0}")]
    ChipError(String),
    #[error("HAL was released")]
    HalGone,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read timed out")]
    Timeout,
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
    #[error("sensor reading implausible: {0}")]
    Implausible(String),
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("pump already running")]
    PumpBusy,
    #[error("relay write failed: {0}")]
    RelayWrite(#[from] HalError),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("probe timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
