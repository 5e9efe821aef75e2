//! # OS process table.
//!
//! The supervisor shares no memory with workers; it only sees what the OS reports.
//! [`ProcessTable`] is that view: typed records (pid + argv), structured spawn, and
//! SIGTERM delivery. [`SystemProcessTable`] implements it with `sysinfo` and
//! `tokio::process`.

use std::process::Stdio;

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// One process as seen at scan time. Pids may be reused by the OS at any moment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Process id.
    pub pid: u32,
    /// Command line, program first.
    pub args: Vec<String>,
}

/// Process enumeration and control.
pub trait ProcessTable: Send + Sync + 'static {
    /// Snapshot of all visible processes.
    fn scan(&self) -> Vec<ProcessRecord>;

    /// Starts `argv` detached from the caller; returns its pid.
    fn spawn(&self, argv: &[String]) -> Result<u32, String>;

    /// Sends a termination signal to `pid`.
    fn terminate(&self, pid: u32) -> Result<(), String>;
}

/// The real process table.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn scan(&self) -> Vec<ProcessRecord> {
        let sys = System::new_all();
        sys.processes()
            .iter()
            // Linux lists every thread as a task sharing its process's argv.
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessRecord {
                pid: pid.as_u32(),
                args: process
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect(),
            })
            .collect()
    }

    fn spawn(&self, argv: &[String]) -> Result<u32, String> {
        let (program, args) = argv.split_first().ok_or("empty command line")?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| e.to_string())?;
        child.id().ok_or_else(|| "child exited before reporting a pid".to_string())
    }

    fn terminate(&self, pid: u32) -> Result<(), String> {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = sys.process(pid).ok_or("no such process")?;
        match process.kill_with(Signal::Term) {
            Some(true) => Ok(()),
            Some(false) => Err("signal not delivered".to_string()),
            None => Err("SIGTERM is not supported on this platform".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_sees_current_process() {
        let me = std::process::id();
        let records = SystemProcessTable.scan();
        let own = records.iter().find(|r| r.pid == me).expect("own pid listed");
        assert!(!own.args.is_empty());
    }

    #[test]
    fn test_scan_lists_each_process_once() {
        let (release, hold) = std::sync::mpsc::channel::<()>();
        let hold = std::sync::Arc::new(std::sync::Mutex::new(hold));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let hold = std::sync::Arc::clone(&hold);
                std::thread::spawn(move || {
                    let _ = hold.lock().map(|rx| rx.recv_timeout(std::time::Duration::from_secs(5)));
                })
            })
            .collect();

        let me = std::process::id();
        let records = SystemProcessTable.scan();
        let own = records.iter().find(|r| r.pid == me).expect("own pid listed");
        let same: Vec<u32> = records
            .iter()
            .filter(|r| r.args == own.args)
            .map(|r| r.pid)
            .collect();

        drop(release);
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(same, vec![me]);
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        assert!(SystemProcessTable.spawn(&[]).is_err());
    }
}
