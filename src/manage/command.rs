//! # Worker invocation pattern.
//!
//! The supervisor both builds worker command lines and recognises them in the process
//! table. Matching is token-based over argv, never substring search on a joined string:
//! a process is a worker when its program file name equals the worker program's, one of
//! its arguments is the `run` subcommand, and it carries a `--queue` argument.

use std::path::{Path, PathBuf};

use crate::manage::process_table::ProcessRecord;

/// Worker subcommand token.
pub const RUN_SUBCOMMAND: &str = "run";
/// Queue flag of the worker subcommand.
pub const QUEUE_FLAG: &str = "--queue";

/// How workers are launched and recognised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    config: Option<PathBuf>,
}

impl WorkerCommand {
    /// Workers run `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config: None,
        }
    }

    /// Passes `--config <path>` to spawned workers.
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = Some(path.into());
        self
    }

    /// Worker executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command line for a worker on `queue`, program first.
    pub fn argv(&self, queue: &str) -> Vec<String> {
        let mut argv = vec![self.program.to_string_lossy().into_owned()];
        if let Some(config) = &self.config {
            argv.push("--config".to_string());
            argv.push(config.to_string_lossy().into_owned());
        }
        argv.push(RUN_SUBCOMMAND.to_string());
        argv.push(format!("{QUEUE_FLAG}={queue}"));
        argv
    }

    /// Whether `record` is a worker; with `Some(queue)`, a worker on that queue.
    pub fn matches(&self, record: &ProcessRecord, queue: Option<&str>) -> bool {
        let Some((program, args)) = record.args.split_first() else {
            return false;
        };
        let Some(expected) = self.program.file_name() else {
            return false;
        };
        if Path::new(program).file_name() != Some(expected) {
            return false;
        }
        if !args.iter().any(|a| a == RUN_SUBCOMMAND) {
            return false;
        }
        match (queue_argument(args), queue) {
            (Some(found), Some(wanted)) => found == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Value of `--queue=<q>` or `--queue <q>`.
fn queue_argument(args: &[String]) -> Option<&str> {
    let prefix = format!("{QUEUE_FLAG}=");
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            return Some(value);
        }
        if arg == QUEUE_FLAG {
            return iter.next().map(String::as_str);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(args: &[&str]) -> ProcessRecord {
        ProcessRecord {
            pid: 7,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_argv_layout() {
        let cmd = WorkerCommand::new("/usr/bin/queuevisor").with_config("/etc/qv.toml");
        assert_eq!(
            cmd.argv("orders"),
            vec!["/usr/bin/queuevisor", "--config", "/etc/qv.toml", "run", "--queue=orders"]
        );
    }

    #[test]
    fn test_matches_own_argv() {
        let cmd = WorkerCommand::new("/usr/bin/queuevisor");
        let argv = cmd.argv("orders");
        let rec = ProcessRecord { pid: 1, args: argv };
        assert!(cmd.matches(&rec, Some("orders")));
        assert!(cmd.matches(&rec, None));
        assert!(!cmd.matches(&rec, Some("orders.audit")));
    }

    #[test]
    fn test_matches_by_file_name_and_split_flag() {
        let cmd = WorkerCommand::new("/usr/bin/queuevisor");
        let rec = record(&["./queuevisor", "run", "--queue", "orders"]);
        assert!(cmd.matches(&rec, Some("orders")));
    }

    #[test]
    fn test_rejects_lookalikes() {
        let cmd = WorkerCommand::new("/usr/bin/queuevisor");
        assert!(!cmd.matches(&record(&["grep", "queuevisor run --queue=orders"]), None));
        assert!(!cmd.matches(&record(&["queuevisor", "keep"]), None));
        assert!(!cmd.matches(&record(&["queuevisor", "run"]), None));
        assert!(!cmd.matches(&record(&["queuevisor-old", "run", "--queue=orders"]), None));
        assert!(!cmd.matches(&record(&[]), None));
    }
}
