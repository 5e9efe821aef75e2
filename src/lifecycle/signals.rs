//! # OS signal bridge.
//!
//! Maps process signals onto a worker's [`ControlHandle`]:
//!
//! | signal          | action                  |
//! |-----------------|-------------------------|
//! | SIGINT          | soft stop               |
//! | SIGTERM/SIGQUIT | hard stop               |
//! | SIGHUP          | restart                 |
//! | SIGUSR1         | health probe after 1 s  |
//! | SIGUSR2         | health probe after 10 s |
//!
//! All handlers are registered up front; a registration failure means the signal
//! facility is unavailable and the worker must not start.
//!
//! [`wait_for_shutdown_signal`] is the supervisor's variant: it completes on the first
//! SIGINT / SIGTERM / SIGQUIT.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ListenerError;
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::control::ControlHandle;

/// Delay of the short health probe (SIGUSR1).
pub const PROBE_SHORT: Duration = Duration::from_secs(1);
/// Delay of the long health probe (SIGUSR2).
pub const PROBE_LONG: Duration = Duration::from_secs(10);

/// Process signals a worker reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerSignal {
    /// SIGINT: soft stop.
    Interrupt,
    /// SIGTERM: hard stop.
    Terminate,
    /// SIGQUIT: hard stop.
    Quit,
    /// SIGHUP: restart.
    Hangup,
    /// SIGUSR1: short health probe.
    User1,
    /// SIGUSR2: long health probe.
    User2,
}

impl WorkerSignal {
    /// Conventional signal name.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerSignal::Interrupt => "SIGINT",
            WorkerSignal::Terminate => "SIGTERM",
            WorkerSignal::Quit => "SIGQUIT",
            WorkerSignal::Hangup => "SIGHUP",
            WorkerSignal::User1 => "SIGUSR1",
            WorkerSignal::User2 => "SIGUSR2",
        }
    }

    /// Forwards the signal to `control`.
    pub fn apply(&self, control: &ControlHandle) {
        match self {
            WorkerSignal::Interrupt => control.soft_stop(),
            WorkerSignal::Terminate | WorkerSignal::Quit => control.hard_stop(),
            WorkerSignal::Hangup => control.restart(),
            WorkerSignal::User1 => control.probe(PROBE_SHORT),
            WorkerSignal::User2 => control.probe(PROBE_LONG),
        }
    }
}

/// Registers the worker signal handlers and forwards them to `control` until the
/// returned task is aborted.
///
/// # Errors
/// [`ListenerError::Signals`] if any handler cannot be installed.
#[cfg(unix)]
pub fn bridge_signals(control: ControlHandle, bus: Bus) -> Result<JoinHandle<()>, ListenerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| ListenerError::Signals {
            error: e.to_string(),
        })
    };
    let mut sigint = install(SignalKind::interrupt())?;
    let mut sigterm = install(SignalKind::terminate())?;
    let mut sigquit = install(SignalKind::quit())?;
    let mut sighup = install(SignalKind::hangup())?;
    let mut sigusr1 = install(SignalKind::user_defined1())?;
    let mut sigusr2 = install(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => WorkerSignal::Interrupt,
                Some(()) = sigterm.recv() => WorkerSignal::Terminate,
                Some(()) = sigquit.recv() => WorkerSignal::Quit,
                Some(()) = sighup.recv() => WorkerSignal::Hangup,
                Some(()) = sigusr1.recv() => WorkerSignal::User1,
                Some(()) = sigusr2.recv() => WorkerSignal::User2,
                else => break,
            };
            received.apply(&control);
            info!(signal = received.as_label(), "signal received");
            bus.publish(Event::new(EventKind::ShutdownRequested).with_reason(received.as_label()));
        }
    }))
}

#[cfg(not(unix))]
pub fn bridge_signals(control: ControlHandle, bus: Bus) -> Result<JoinHandle<()>, ListenerError> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            WorkerSignal::Interrupt.apply(&control);
            bus.publish(Event::new(EventKind::ShutdownRequested).with_reason("ctrl_c"));
        }
    }))
}

/// Completes on the first SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
