//! # Consumer state machine.
//!
//! ```text
//!            ┌──────────► STOPPING_SOFT ──┐
//! RUNNING ───┼──────────► STOPPING_HARD ──┼──► STOPPED
//!    ▲       ├──────────► RESTARTING ─────┤ (transport fault)
//!    │       │                 │          │
//!    │       └── drained / fault ─────────┘
//!    └─────────────────────────┘
//! ```
//!
//! ## Rules
//! - At most one terminal action (`STOPPING_SOFT` or `STOPPING_HARD`) per lifetime.
//! - Every request after `STOPPED` is a no-op.

use std::fmt;

/// State of one worker's consume loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    /// Waiting for and dispatching deliveries.
    Running,
    /// Consumer cancelled; draining the last in-flight delivery.
    StoppingSoft,
    /// Connection being closed; in-flight work abandoned.
    StoppingHard,
    /// Channel being replaced.
    Restarting,
    /// Loop finished.
    Stopped,
}

impl ConsumerState {
    /// Stable label for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsumerState::Running => "running",
            ConsumerState::StoppingSoft => "stopping_soft",
            ConsumerState::StoppingHard => "stopping_hard",
            ConsumerState::Restarting => "restarting",
            ConsumerState::Stopped => "stopped",
        }
    }

    fn is_terminal_action(&self) -> bool {
        matches!(self, ConsumerState::StoppingSoft | ConsumerState::StoppingHard)
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Transition guard over [`ConsumerState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: ConsumerState,
    terminal_taken: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts in `Running`.
    pub fn new() -> Self {
        Self {
            state: ConsumerState::Running,
            terminal_taken: false,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ConsumerState::Stopped
    }

    /// Whether `to` is reachable from the current state right now.
    pub fn can(&self, to: ConsumerState) -> bool {
        use ConsumerState::*;
        if to.is_terminal_action() && self.terminal_taken {
            return false;
        }
        matches!(
            (self.state, to),
            (Running, StoppingSoft | StoppingHard | Restarting | Stopped)
                | (StoppingSoft, Stopped)
                | (StoppingHard, Stopped)
                | (Restarting, Running | Stopped)
        )
    }

    /// Moves to `to` if allowed; returns whether the transition happened.
    pub fn advance(&mut self, to: ConsumerState) -> bool {
        if !self.can(to) {
            return false;
        }
        if to.is_terminal_action() {
            self.terminal_taken = true;
        }
        self.state = to;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::ConsumerState::*;
    use super::*;

    #[test]
    fn test_soft_path() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(StoppingSoft));
        assert!(!lc.advance(Running));
        assert!(lc.advance(Stopped));
        assert!(lc.is_stopped());
    }

    #[test]
    fn test_restart_returns_to_running() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(Restarting));
        assert!(!lc.advance(StoppingSoft));
        assert!(lc.advance(Running));
        assert!(lc.advance(Restarting));
        assert!(lc.advance(Running));
        assert_eq!(lc.state(), Running);
    }

    #[test]
    fn test_one_terminal_action_per_lifetime() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(StoppingSoft));
        assert!(!lc.advance(StoppingHard));
        assert_eq!(lc.state(), StoppingSoft);
    }

    #[test]
    fn test_stopped_ignores_everything() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(StoppingHard));
        assert!(lc.advance(Stopped));
        for to in [Running, StoppingSoft, StoppingHard, Restarting, Stopped] {
            assert!(!lc.advance(to));
        }
    }
}
