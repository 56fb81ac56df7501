//! External hooks: everything a collaborator (CLI, HTTP API, chat
//! assistant — all out of scope here) plugs into. The core only owns the
//! channel plumbing; transports are someone else's problem.

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::decision::ReasonCode;
use crate::state::{SharedState, StatusTag};
use crate::store::{IrrigationEventRow, Store};

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualTriggerOptions {
    pub override_soil: bool,
    pub duration_sec: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "outcome")]
pub enum ManualTriggerOutcome {
    Accepted { reason: ReasonCode, duration_sec: u64 },
    Rejected { reason: ReasonCode },
}

pub struct ManualTriggerRequest {
    pub options: ManualTriggerOptions,
    pub reply: oneshot::Sender<ManualTriggerOutcome>,
}

/// Sending half held by callers; the controller loop owns the receiver.
pub type ManualTriggerSender = mpsc::Sender<ManualTriggerRequest>;
pub type ManualTriggerReceiver = mpsc::Receiver<ManualTriggerRequest>;

pub fn manual_trigger_channel(capacity: usize) -> (ManualTriggerSender, ManualTriggerReceiver) {
    mpsc::channel(capacity)
}

/// Convenience for callers: submit a request and await its outcome.
pub async fn trigger_manual_irrigation(
    sender: &ManualTriggerSender,
    options: ManualTriggerOptions,
) -> anyhow::Result<ManualTriggerOutcome> {
    let (reply, rx) = oneshot::channel();
    sender
        .send(ManualTriggerRequest { options, reply })
        .await
        .map_err(|_| anyhow::anyhow!("controller loop is no longer accepting manual triggers"))?;
    rx.await
        .map_err(|_| anyhow::anyhow!("controller loop dropped the reply channel"))
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: StatusTag,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    pub pump_running: bool,
    pub today_irrigation_sec: u64,
    pub last_irrigation: Option<IrrigationEventRow>,
}

pub async fn get_status(
    state: &SharedState,
    store: &Store,
    pump_running: bool,
) -> anyhow::Result<StatusSnapshot> {
    let snapshot = {
        let guard = state.read().await;
        (guard.status, guard.last_update)
    };
    let today_irrigation_sec = store.today_irrigation_seconds(OffsetDateTime::now_utc()).await?;
    let last_irrigation = store.last_irrigation().await?;

    Ok(StatusSnapshot {
        status: snapshot.0,
        last_update: snapshot.1,
        pump_running,
        today_irrigation_sec,
        last_irrigation,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CommittedEvent {
    Irrigation {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        duration_sec: u64,
        reason: ReasonCode,
    },
    Alert {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        message: String,
    },
}

/// At-least-once broadcast of committed events; subscribers that fall
/// behind just miss the oldest ones (standard `broadcast` lag behavior),
/// matching the "duplicates possible on crash recovery, no stronger
/// guarantee" contract.
pub fn event_subscription_channel(capacity: usize) -> (broadcast::Sender<CommittedEvent>, broadcast::Receiver<CommittedEvent>) {
    broadcast::channel(capacity)
}

pub fn new_shutdown_token() -> CancellationToken {
    CancellationToken::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_shared_state;

    #[tokio::test]
    async fn manual_trigger_round_trips_outcome() {
        let (tx, mut rx) = manual_trigger_channel(4);

        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                let _ = req.reply.send(ManualTriggerOutcome::Accepted {
                    reason: ReasonCode::Manual,
                    duration_sec: 5,
                });
            }
        });

        let outcome = trigger_manual_irrigation(&tx, ManualTriggerOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ManualTriggerOutcome::Accepted { duration_sec: 5, .. }));
    }

    #[tokio::test]
    async fn get_status_reflects_current_state_and_counters() {
        let state = new_shared_state();
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();

        let snap = get_status(&state, &store, false).await.unwrap();
        assert_eq!(snap.status, StatusTag::Idle);
        assert_eq!(snap.today_irrigation_sec, 0);
        assert!(snap.last_irrigation.is_none());
    }

    #[tokio::test]
    async fn shutdown_token_cancels_independently_of_clones() {
        let token = new_shutdown_token();
        let child = token.clone();
        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn event_subscription_delivers_to_subscriber() {
        let (tx, mut rx) = event_subscription_channel(8);
        tx.send(CommittedEvent::Alert {
            timestamp: OffsetDateTime::now_utc(),
            message: "tank low".into(),
        })
        .unwrap();
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, CommittedEvent::Alert { .. }));
    }
}
