//! GPIO arbiter: the single owner of the hardware chip handle. All reads,
//! writes, and claims go through one mutex so nothing else ever touches
//! the chip directly. A small blink scheduler lives here too, since blink
//! toggles have to serialize with everything else that writes a pin.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, Level as RppalLevel, OutputPin};

use crate::error::HalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinStatus {
    pub direction: Direction,
    pub owner_tag: String,
    pub last_value: bool,
}

enum PinHandle {
    #[cfg(feature = "gpio")]
    RealOut(OutputPin),
    #[cfg(feature = "gpio")]
    RealIn(InputPin),
    MockOut(bool),
    MockIn(bool),
}

struct ClaimedPin {
    handle: PinHandle,
    status: PinStatus,
}

struct HalInner {
    pins: HashMap<u8, ClaimedPin>,
    blinks: HashMap<u8, (CancellationToken, JoinHandle<()>)>,
    #[cfg(feature = "gpio")]
    chip: Gpio,
}

/// Shared handle to the GPIO arbiter. Cheap to clone; all clones serialize
/// through the same internal mutex.
#[derive(Clone)]
pub struct Hal {
    inner: Arc<Mutex<HalInner>>,
}

/// Non-owning handle to the GPIO arbiter. Drivers and actuators hold this
/// instead of a `Hal` so the arbiter can be released (`Hal::shutdown`
/// dropping the last strong reference) without a driver keeping it alive
/// behind everyone's back.
#[derive(Clone)]
pub struct WeakHal {
    inner: Weak<Mutex<HalInner>>,
}

impl WeakHal {
    pub fn upgrade(&self) -> Option<Hal> {
        self.inner.upgrade().map(|inner| Hal { inner })
    }

    /// Same as `upgrade`, but for callers that already propagate `HalError`.
    pub fn upgrade_or_err(&self) -> Result<Hal, HalError> {
        self.upgrade().ok_or(HalError::HalGone)
    }
}

impl Hal {
    pub fn downgrade(&self) -> WeakHal {
        WeakHal { inner: Arc::downgrade(&self.inner) }
    }

    #[cfg(feature = "gpio")]
    pub fn new() -> Result<Self, HalError> {
        let chip = Gpio::new().map_err(|e| HalError::ChipError(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(HalInner {
                pins: HashMap::new(),
                blinks: HashMap::new(),
                chip,
            })),
        })
    }

    #[cfg(not(feature = "gpio"))]
    pub fn new() -> Result<Self, HalError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(HalInner {
                pins: HashMap::new(),
                blinks: HashMap::new(),
            })),
        })
    }

    pub async fn claim_output(
        &self,
        pin: u8,
        initial_level: bool,
        owner_tag: &str,
    ) -> Result<(), HalError> {
        let mut inner = self.inner.lock().await;
        if inner.pins.contains_key(&pin) {
            return Err(HalError::PinAlreadyClaimed(pin));
        }

        #[cfg(feature = "gpio")]
        let handle = {
            let mut out = inner
                .chip
                .get(pin)
                .map_err(|e| HalError::ChipError(e.to_string()))?
                .into_output();
            if initial_level {
                out.set_high();
            } else {
                out.set_low();
            }
            PinHandle::RealOut(out)
        };
        #[cfg(not(feature = "gpio"))]
        let handle = PinHandle::MockOut(initial_level);

        info!(pin, owner_tag, initial_level, "claimed output pin");
        inner.pins.insert(
            pin,
            ClaimedPin {
                handle,
                status: PinStatus {
                    direction: Direction::Out,
                    owner_tag: owner_tag.to_string(),
                    last_value: initial_level,
                },
            },
        );
        Ok(())
    }

    pub async fn claim_input(&self, pin: u8, owner_tag: &str) -> Result<(), HalError> {
        let mut inner = self.inner.lock().await;
        if inner.pins.contains_key(&pin) {
            return Err(HalError::PinAlreadyClaimed(pin));
        }

        #[cfg(feature = "gpio")]
        let handle = {
            let input = inner
                .chip
                .get(pin)
                .map_err(|e| HalError::ChipError(e.to_string()))?
                .into_input();
            PinHandle::RealIn(input)
        };
        #[cfg(not(feature = "gpio"))]
        let handle = PinHandle::MockIn(false);

        info!(pin, owner_tag, "claimed input pin");
        inner.pins.insert(
            pin,
            ClaimedPin {
                handle,
                status: PinStatus {
                    direction: Direction::In,
                    owner_tag: owner_tag.to_string(),
                    last_value: false,
                },
            },
        );
        Ok(())
    }

    pub async fn write(&self, pin: u8, level: bool) -> Result<(), HalError> {
        let mut inner = self.inner.lock().await;
        let claimed = inner
            .pins
            .get_mut(&pin)
            .ok_or(HalError::PinNotClaimed(pin))?;
        match &mut claimed.handle {
            #[cfg(feature = "gpio")]
            PinHandle::RealOut(out) => {
                if level {
                    out.set_high();
                } else {
                    out.set_low();
                }
            }
            #[cfg(feature = "gpio")]
            PinHandle::RealIn(_) => return Err(HalError::ChipError(format!("pin {pin} is an input"))),
            PinHandle::MockOut(v) => *v = level,
            PinHandle::MockIn(_) => return Err(HalError::ChipError(format!("pin {pin} is an input"))),
        }
        claimed.status.last_value = level;
        Ok(())
    }

    pub async fn read(&self, pin: u8) -> Result<bool, HalError> {
        let inner = self.inner.lock().await;
        let claimed = inner.pins.get(&pin).ok_or(HalError::PinNotClaimed(pin))?;
        let value = match &claimed.handle {
            #[cfg(feature = "gpio")]
            PinHandle::RealOut(out) => out.is_set_high(),
            #[cfg(feature = "gpio")]
            PinHandle::RealIn(input) => input.read() == RppalLevel::High,
            PinHandle::MockOut(v) => *v,
            PinHandle::MockIn(v) => *v,
        };
        Ok(value)
    }

    /// Test/simulation helper: push a value into a claimed mock input pin
    /// as if the hardware had driven it, without going through `write`.
    #[cfg(not(feature = "gpio"))]
    pub async fn set_mock_input(&self, pin: u8, level: bool) -> Result<(), HalError> {
        let mut inner = self.inner.lock().await;
        let claimed = inner.pins.get_mut(&pin).ok_or(HalError::PinNotClaimed(pin))?;
        match &mut claimed.handle {
            PinHandle::MockIn(v) => *v = level,
            _ => return Err(HalError::ChipError(format!("pin {pin} is not a mock input"))),
        }
        Ok(())
    }

    pub async fn status(&self) -> HashMap<u8, PinStatus> {
        let inner = self.inner.lock().await;
        inner
            .pins
            .iter()
            .map(|(pin, claimed)| (*pin, claimed.status.clone()))
            .collect()
    }

    /// Cancel any running blink on `pin`, then write a steady level.
    pub async fn set_steady(&self, pin: u8, level: bool) -> Result<(), HalError> {
        self.cancel_blink(pin).await;
        self.write(pin, level).await
    }

    /// Start (or replace) a blink on `pin`: alternates level every
    /// `interval`, starting from `start_level`. Serializes through `write`
    /// like any other caller.
    pub async fn start_blink(&self, pin: u8, interval: Duration, start_level: bool) {
        self.cancel_blink(pin).await;

        let token = CancellationToken::new();
        let child = token.clone();
        let hal = self.clone();
        let handle = tokio::spawn(async move {
            let mut level = start_level;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if hal.write(pin, level).await.is_err() {
                            break;
                        }
                        level = !level;
                    }
                }
            }
            debug!(pin, "blink task terminated");
        });

        let mut inner = self.inner.lock().await;
        inner.blinks.insert(pin, (token, handle));
    }

    async fn cancel_blink(&self, pin: u8) {
        let entry = {
            let mut inner = self.inner.lock().await;
            inner.blinks.remove(&pin)
        };
        if let Some((token, handle)) = entry {
            token.cancel();
            let _ = handle.await;
        }
    }

    /// Drive every claimed output low, cancel every blink, release all
    /// claims. Idempotent.
    pub async fn shutdown(&self) {
        let pins: Vec<u8> = {
            let inner = self.inner.lock().await;
            inner.blinks.keys().copied().collect()
        };
        for pin in pins {
            self.cancel_blink(pin).await;
        }

        let mut inner = self.inner.lock().await;
        let output_pins: Vec<u8> = inner
            .pins
            .iter()
            .filter(|(_, c)| c.status.direction == Direction::Out)
            .map(|(pin, _)| *pin)
            .collect();
        for pin in output_pins {
            if let Some(claimed) = inner.pins.get_mut(&pin) {
                match &mut claimed.handle {
                    #[cfg(feature = "gpio")]
                    PinHandle::RealOut(out) => out.set_low(),
                    PinHandle::MockOut(v) => *v = false,
                    _ => {}
                }
                claimed.status.last_value = false;
            }
        }
        inner.pins.clear();
        warn!("HAL shutdown complete, all pins released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_output_sets_initial_level() {
        let hal = Hal::new().unwrap();
        hal.claim_output(17, true, "pump").await.unwrap();
        assert!(hal.read(17).await.unwrap());
    }

    #[tokio::test]
    async fn double_claim_fails() {
        let hal = Hal::new().unwrap();
        hal.claim_output(17, false, "a").await.unwrap();
        let err = hal.claim_output(17, false, "b").await.unwrap_err();
        assert!(matches!(err, HalError::PinAlreadyClaimed(17)));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let hal = Hal::new().unwrap();
        hal.claim_output(5, false, "led").await.unwrap();
        hal.write(5, true).await.unwrap();
        assert!(hal.read(5).await.unwrap());
        hal.write(5, false).await.unwrap();
        assert!(!hal.read(5).await.unwrap());
    }

    #[tokio::test]
    async fn write_unclaimed_pin_fails() {
        let hal = Hal::new().unwrap();
        let err = hal.write(9, true).await.unwrap_err();
        assert!(matches!(err, HalError::PinNotClaimed(9)));
    }

    #[tokio::test]
    async fn shutdown_drives_outputs_low_and_clears_registry() {
        let hal = Hal::new().unwrap();
        hal.claim_output(1, true, "a").await.unwrap();
        hal.claim_output(2, true, "b").await.unwrap();
        hal.shutdown().await;
        assert!(hal.status().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let hal = Hal::new().unwrap();
        hal.claim_output(1, true, "a").await.unwrap();
        hal.shutdown().await;
        hal.shutdown().await;
        assert!(hal.status().await.is_empty());
    }

    #[tokio::test]
    async fn set_steady_cancels_running_blink() {
        let hal = Hal::new().unwrap();
        hal.claim_output(3, false, "led").await.unwrap();
        hal.start_blink(3, Duration::from_millis(5), true).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        hal.set_steady(3, true).await.unwrap();
        let value_after = hal.read(3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // No blink task left alive to flip it back.
        assert_eq!(hal.read(3).await.unwrap(), value_after);
    }

    #[tokio::test]
    async fn starting_a_new_blink_replaces_the_old_one() {
        let hal = Hal::new().unwrap();
        hal.claim_output(4, false, "led").await.unwrap();
        hal.start_blink(4, Duration::from_secs(60), true).await;
        hal.start_blink(4, Duration::from_millis(5), true).await;
        let before = hal.read(4).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // The fast blink replaced the slow one, so the level should have
        // flipped within 30ms.
        assert_ne!(hal.read(4).await.unwrap(), before);
    }

    #[tokio::test]
    async fn status_reports_claimed_pins() {
        let hal = Hal::new().unwrap();
        hal.claim_output(7, true, "pump").await.unwrap();
        let status = hal.status().await;
        let st = status.get(&7).unwrap();
        assert_eq!(st.direction, Direction::Out);
        assert_eq!(st.owner_tag, "pump");
        assert!(st.last_value);
    }

    #[tokio::test]
    async fn weak_hal_upgrades_while_the_strong_handle_is_alive() {
        let hal = Hal::new().unwrap();
        let weak = hal.downgrade();
        assert!(weak.upgrade().is_some());
    }

    #[tokio::test]
    async fn weak_hal_fails_to_upgrade_once_the_last_strong_handle_is_dropped() {
        let hal = Hal::new().unwrap();
        let weak = hal.downgrade();
        drop(hal);
        assert!(weak.upgrade().is_none());
        assert!(matches!(weak.upgrade_or_err(), Err(HalError::HalGone)));
    }
}
