//! # Control plane of one worker.
//!
//! [`ControlHandle`] is what OS signals (or tests, or embedding code) use to steer a
//! running [`Listener`](crate::lifecycle::Listener). Requests never block:
//!
//! - hard stop cancels a [`CancellationToken`] that the loop observes both while waiting
//!   and while a delivery is being handled;
//! - soft stop / restart / probe go through an unbounded queue read at the loop's
//!   suspension point, so an in-flight delivery always finishes first.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::state::ConsumerState;

/// Cooperative control requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Cancel the consumer and drain.
    SoftStop,
    /// Replace the channel and consume again.
    Restart,
    /// Report process health after the delay.
    Probe(Duration),
}

impl ControlSignal {
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlSignal::SoftStop => "soft_stop",
            ControlSignal::Restart => "restart",
            ControlSignal::Probe(_) => "probe",
        }
    }
}

/// Cloneable handle to a worker's control plane.
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlSignal>,
    hard: CancellationToken,
    state: watch::Receiver<ConsumerState>,
}

/// Receiving side, owned by the consume loop.
pub(crate) struct ControlInbox {
    pub(crate) rx: mpsc::UnboundedReceiver<ControlSignal>,
    pub(crate) hard: CancellationToken,
    pub(crate) state: watch::Sender<ConsumerState>,
}

pub(crate) fn control_plane() -> (ControlHandle, ControlInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hard = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(ConsumerState::Running);
    (
        ControlHandle {
            tx,
            hard: hard.clone(),
            state: state_rx,
        },
        ControlInbox {
            rx,
            hard,
            state: state_tx,
        },
    )
}

impl ControlHandle {
    /// Interactive stop: let the current delivery finish, receive nothing more.
    pub fn soft_stop(&self) {
        let _ = self.tx.send(ControlSignal::SoftStop);
    }

    /// Termination: close the connection now, abandoning in-flight work.
    pub fn hard_stop(&self) {
        self.hard.cancel();
    }

    /// Reload: close the channel and consume again on a fresh one.
    pub fn restart(&self) {
        let _ = self.tx.send(ControlSignal::Restart);
    }

    /// Schedules a health report `after` from now.
    pub fn probe(&self, after: Duration) {
        let _ = self.tx.send(ControlSignal::Probe(after));
    }

    /// Last published consumer state.
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Waits until the loop reports `target`; returns `false` if the loop is gone first.
    pub async fn wait_for(&self, target: ConsumerState) -> bool {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target).await.is_ok()
    }
}
