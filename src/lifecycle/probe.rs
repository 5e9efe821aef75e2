//! Health probe: resident memory of the current process.

use sysinfo::System;

use crate::events::{Event, EventKind};

/// One health sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Process id.
    pub pid: u32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Virtual memory in bytes.
    pub virtual_memory_bytes: u64,
}

impl HealthReport {
    /// Samples the current process; `None` if the platform does not expose it.
    pub fn sample() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let sys = System::new_all();
        let process = sys.process(pid)?;
        Some(Self {
            pid: pid.as_u32(),
            memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
        })
    }

    pub fn to_event(&self) -> Event {
        Event::new(EventKind::HealthProbe)
            .with_pid(self.pid)
            .with_memory(self.memory_bytes)
    }
}
