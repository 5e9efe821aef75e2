//! # Worker population management.
//!
//! The supervisor side of the system: a separate process that inspects the OS process
//! table and keeps a desired number of `run` workers alive per queue.
//!
//! - [`ProcessTable`] / [`SystemProcessTable`] enumerate, spawn and signal processes.
//! - [`WorkerCommand`] builds worker command lines and recognises them.
//! - [`ProcessSupervisor`] implements `keep` / `kill_all` and the periodic keep loop.
//! - [`BackoffPolicy`] / [`JitterPolicy`] pace retries while passes fail.

mod backoff;
mod command;
mod process_table;
mod supervisor;

pub use backoff::{BackoffPolicy, JitterPolicy};
pub use command::{QUEUE_FLAG, RUN_SUBCOMMAND, WorkerCommand};
pub use process_table::{ProcessRecord, ProcessTable, SystemProcessTable};
pub use supervisor::{KeepReport, KillReport, ProcessSupervisor};
