//! # Worker lifecycle.
//!
//! Signal-driven control of one consume loop.
//!
//! ```text
//! OS signals ──► bridge_signals ──► ControlHandle ──┬─ hard token ───────┐
//!                                                   └─ control queue ────┤
//!                                                                        ▼
//!                         Listener::run ── select! at the wait point ── Lifecycle (state machine)
//!                                 │
//!                                 └─► Dispatcher (one delivery at a time)
//! ```
//!
//! - [`ConsumerState`] / [`Lifecycle`]: transitions and the single-terminal-action rule.
//! - [`ControlHandle`]: soft stop, hard stop, restart, probe.
//! - [`bridge_signals`]: SIGINT/TERM/QUIT/HUP/USR1/USR2 → control requests.
//! - [`HealthReport`]: delayed memory report.
//! - [`Listener`] / [`ListenerBuilder`]: the worker root object.

mod builder;
mod control;
mod listener;
mod probe;
mod signals;
mod state;

pub use builder::ListenerBuilder;
pub use control::{ControlHandle, ControlSignal};
pub use listener::{ConsumerExit, Listener};
pub use probe::HealthReport;
pub use signals::{
    PROBE_LONG, PROBE_SHORT, WorkerSignal, bridge_signals, wait_for_shutdown_signal,
};
pub use state::{ConsumerState, Lifecycle};
