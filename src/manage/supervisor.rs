//! # Process supervisor.
//!
//! Keeps a desired number of worker processes alive per queue. Every pass re-derives
//! the worker population from the OS process table; nothing is remembered between
//! passes, since pids are volatile and may be reused.
//!
//! ```text
//! keep(queue, desired):
//!   scan ──► count matching workers ──► running < desired ? spawn (desired - running)
//!                                                         : no-op (never kills)
//! kill_all():
//!   scan ──► every matching worker (any queue) ──► SIGTERM
//! ```
//!
//! ## Rules
//! - `keep` is additive only.
//! - The supervisor's own process is never a candidate.
//! - Spawn and signal failures are collected into the report and published as
//!   [`EventKind::SupervisionFailed`]; they never abort the pass.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::KeepEntry;
use crate::error::SupervisionError;
use crate::events::{Bus, Event, EventKind};
use crate::manage::backoff::BackoffPolicy;
use crate::manage::command::WorkerCommand;
use crate::manage::process_table::{ProcessRecord, ProcessTable};

/// Outcome of one `keep` for one queue.
#[derive(Debug)]
pub struct KeepReport {
    /// Queue kept.
    pub queue: String,
    /// Command line used for spawning.
    pub command: Vec<String>,
    /// Matching workers found by the scan.
    pub running: usize,
    /// Desired workers.
    pub desired: usize,
    /// Pids started by this pass.
    pub spawned: Vec<u32>,
    /// Spawns that failed.
    pub failures: Vec<SupervisionError>,
}

impl KeepReport {
    /// Workers expected after this pass.
    pub fn total(&self) -> usize {
        self.running + self.spawned.len()
    }

    /// No spawn failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of `kill_all`.
#[derive(Debug, Default)]
pub struct KillReport {
    /// Matching workers found by the scan.
    pub matched: Vec<ProcessRecord>,
    /// Pids that were signalled.
    pub killed: Vec<u32>,
    /// Signals that could not be delivered.
    pub failures: Vec<SupervisionError>,
}

/// External worker-population manager.
pub struct ProcessSupervisor {
    table: Arc<dyn ProcessTable>,
    command: WorkerCommand,
    bus: Bus,
    own_pid: u32,
}

impl ProcessSupervisor {
    /// Creates a supervisor over `table` launching `command`.
    pub fn new(table: Arc<dyn ProcessTable>, command: WorkerCommand, bus: Bus) -> Self {
        Self {
            table,
            command,
            bus,
            own_pid: std::process::id(),
        }
    }

    /// Worker command pattern.
    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Workers currently running; `Some(queue)` restricts to one queue.
    pub fn workers(&self, queue: Option<&str>) -> Vec<ProcessRecord> {
        self.table
            .scan()
            .into_iter()
            .filter(|r| r.pid != self.own_pid && self.command.matches(r, queue))
            .collect()
    }

    /// Spawns `desired - running` workers on `queue` when below target.
    pub fn keep(&self, queue: &str, desired: usize) -> KeepReport {
        let running = self.workers(Some(queue)).len();
        let argv = self.command.argv(queue);
        let mut report = KeepReport {
            queue: queue.to_string(),
            command: argv.clone(),
            running,
            desired,
            spawned: Vec::new(),
            failures: Vec::new(),
        };

        for _ in running..desired {
            match self.table.spawn(&argv) {
                Ok(pid) => {
                    info!(queue, pid, "worker spawned");
                    self.bus.publish(
                        Event::new(EventKind::ProcessSpawned)
                            .with_queue(queue)
                            .with_pid(pid),
                    );
                    report.spawned.push(pid);
                }
                Err(error) => {
                    let err = SupervisionError::Spawn {
                        queue: queue.to_string(),
                        error,
                    };
                    self.report_failure(&err, Some(queue));
                    report.failures.push(err);
                }
            }
        }
        report
    }

    /// Runs [`keep`](Self::keep) for every entry, in order.
    pub fn keep_all(&self, entries: &[KeepEntry]) -> Vec<KeepReport> {
        entries.iter().map(|e| self.keep(&e.queue, e.count)).collect()
    }

    /// Sends SIGTERM to every worker on any queue.
    pub fn kill_all(&self) -> KillReport {
        let matched = self.workers(None);
        let mut report = KillReport::default();

        for record in &matched {
            match self.table.terminate(record.pid) {
                Ok(()) => {
                    info!(pid = record.pid, "worker terminated");
                    self.bus
                        .publish(Event::new(EventKind::ProcessKilled).with_pid(record.pid));
                    report.killed.push(record.pid);
                }
                Err(error) => {
                    let err = SupervisionError::Signal {
                        pid: record.pid,
                        error,
                    };
                    self.report_failure(&err, None);
                    report.failures.push(err);
                }
            }
        }
        report.matched = matched;
        report
    }

    /// Repeats `keep_all` every `every` until `shutdown` completes.
    ///
    /// After a pass with failures the next pass comes after `backoff.next(n)` (never later
    /// than `every`), where `n` counts consecutive failing passes. `on_pass` sees every
    /// pass's reports. Returns the number of passes run.
    pub async fn keep_every<S, F>(
        &self,
        entries: &[KeepEntry],
        every: Duration,
        backoff: BackoffPolicy,
        shutdown: S,
        mut on_pass: F,
    ) -> usize
    where
        S: Future,
        F: FnMut(&[KeepReport]),
    {
        tokio::pin!(shutdown);
        let mut passes = 0usize;
        let mut failing = 0u32;

        loop {
            let reports = self.keep_all(entries);
            passes += 1;
            on_pass(&reports);

            let delay = if reports.iter().all(KeepReport::is_clean) {
                failing = 0;
                every
            } else {
                let d = backoff.next(failing).min(every);
                failing = failing.saturating_add(1);
                d
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        passes
    }

    fn report_failure(&self, err: &SupervisionError, queue: Option<&str>) {
        warn!(label = err.as_label(), error = %err, "supervision failure");
        let mut ev = Event::new(EventKind::SupervisionFailed).with_reason(err.as_message());
        if let Some(q) = queue {
            ev = ev.with_queue(q);
        }
        if let SupervisionError::Signal { pid, .. } = err {
            ev = ev.with_pid(*pid);
        }
        self.bus.publish(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manage::backoff::JitterPolicy;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Process table driven entirely by the test.
    #[derive(Default)]
    struct ScriptedTable {
        procs: Mutex<Vec<ProcessRecord>>,
        next_pid: AtomicU32,
        spawn_fails: Mutex<u32>,
        unkillable: Mutex<Vec<u32>>,
        signalled: Mutex<Vec<u32>>,
    }

    impl ScriptedTable {
        fn with(procs: Vec<ProcessRecord>) -> Arc<Self> {
            Arc::new(Self {
                procs: Mutex::new(procs),
                next_pid: AtomicU32::new(1000),
                ..Default::default()
            })
        }
    }

    impl ProcessTable for ScriptedTable {
        fn scan(&self) -> Vec<ProcessRecord> {
            self.procs.lock().unwrap().clone()
        }

        fn spawn(&self, argv: &[String]) -> Result<u32, String> {
            let mut fails = self.spawn_fails.lock().unwrap();
            if *fails > 0 {
                *fails -= 1;
                return Err("fork failed".into());
            }
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.procs.lock().unwrap().push(ProcessRecord {
                pid,
                args: argv.to_vec(),
            });
            Ok(pid)
        }

        fn terminate(&self, pid: u32) -> Result<(), String> {
            if self.unkillable.lock().unwrap().contains(&pid) {
                return Err("permission denied".into());
            }
            self.signalled.lock().unwrap().push(pid);
            self.procs.lock().unwrap().retain(|r| r.pid != pid);
            Ok(())
        }
    }

    const PROGRAM: &str = "/opt/bin/queuevisor";

    fn worker(pid: u32, queue: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            args: WorkerCommand::new(PROGRAM).argv(queue),
        }
    }

    fn other(pid: u32, args: &[&str]) -> ProcessRecord {
        ProcessRecord {
            pid,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn supervisor(table: Arc<ScriptedTable>) -> (ProcessSupervisor, Bus) {
        let bus = Bus::new(64);
        (
            ProcessSupervisor::new(table, WorkerCommand::new(PROGRAM), bus.clone()),
            bus,
        )
    }

    #[test]
    fn test_keep_spawns_missing_workers() {
        let table = ScriptedTable::with(vec![worker(10, "orders"), worker(11, "audit")]);
        let (sup, bus) = supervisor(table.clone());
        let mut rx = bus.subscribe();

        let report = sup.keep("orders", 3);
        assert_eq!(report.running, 1);
        assert_eq!(report.spawned.len(), 2);
        assert_eq!(report.total(), 3);
        assert!(report.is_clean());
        assert_eq!(sup.workers(Some("orders")).len(), 3);

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::ProcessSpawned);
        assert_eq!(ev.queue.as_deref(), Some("orders"));
    }

    #[test]
    fn test_keep_never_kills_excess() {
        let table = ScriptedTable::with(vec![
            worker(10, "orders"),
            worker(11, "orders"),
            worker(12, "orders"),
        ]);
        let (sup, _bus) = supervisor(table.clone());

        let report = sup.keep("orders", 1);
        assert_eq!(report.running, 3);
        assert!(report.spawned.is_empty());
        assert!(table.signalled.lock().unwrap().is_empty());

        let report = sup.keep("orders", 0);
        assert!(report.spawned.is_empty());
    }

    #[test]
    fn test_keep_is_idempotent() {
        let table = ScriptedTable::with(vec![]);
        let (sup, _bus) = supervisor(table);

        assert_eq!(sup.keep("orders", 2).spawned.len(), 2);
        assert_eq!(sup.keep("orders", 2).spawned.len(), 0);
    }

    #[test]
    fn test_spawn_failure_is_reported_not_fatal() {
        let table = ScriptedTable::with(vec![]);
        *table.spawn_fails.lock().unwrap() = 1;
        let (sup, bus) = supervisor(table);
        let mut rx = bus.subscribe();

        let report = sup.keep("orders", 2);
        assert_eq!(report.spawned.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], SupervisionError::Spawn { .. }));

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&EventKind::SupervisionFailed));
        assert!(kinds.contains(&EventKind::ProcessSpawned));
    }

    #[test]
    fn test_kill_all_signals_only_workers() {
        let table = ScriptedTable::with(vec![
            worker(10, "orders"),
            worker(11, "audit"),
            other(20, &["/opt/bin/queuevisor", "keep"]),
            other(21, &["grep", "queuevisor run --queue=orders"]),
            other(22, &["/usr/sbin/sshd"]),
        ]);
        let (sup, _bus) = supervisor(table.clone());

        let report = sup.kill_all();
        assert_eq!(report.matched.len(), 2);
        let mut signalled = table.signalled.lock().unwrap().clone();
        signalled.sort_unstable();
        assert_eq!(signalled, vec![10, 11]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_kill_all_continues_past_failures() {
        let table = ScriptedTable::with(vec![worker(10, "orders"), worker(11, "orders")]);
        table.unkillable.lock().unwrap().push(10);
        let (sup, _bus) = supervisor(table.clone());

        let report = sup.kill_all();
        assert_eq!(report.killed, vec![11]);
        assert!(matches!(
            report.failures.as_slice(),
            [SupervisionError::Signal { pid: 10, .. }]
        ));
    }

    #[test]
    fn test_own_process_is_excluded() {
        let me = std::process::id();
        let table = ScriptedTable::with(vec![worker(me, "orders")]);
        let (sup, _bus) = supervisor(table.clone());

        assert!(sup.workers(None).is_empty());
        assert!(sup.kill_all().killed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_every_stops_on_shutdown() {
        let table = ScriptedTable::with(vec![]);
        *table.spawn_fails.lock().unwrap() = 2;
        let (sup, _bus) = supervisor(table.clone());
        let entries = vec![KeepEntry {
            queue: "orders".into(),
            count: 1,
        }];
        let backoff = BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(4),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };

        let mut spawned = 0;
        let passes = sup
            .keep_every(
                &entries,
                Duration::from_secs(60),
                backoff,
                tokio::time::sleep(Duration::from_secs(5)),
                |reports| spawned += reports.iter().map(|r| r.spawned.len()).sum::<usize>(),
            )
            .await;

        // t=0 fail, t=1 fail, t=3 spawn, then the 60 s wait is cut by shutdown.
        assert_eq!(passes, 3);
        assert_eq!(spawned, 1);
        assert_eq!(sup.workers(Some("orders")).len(), 1);
    }
}
