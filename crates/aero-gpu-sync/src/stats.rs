use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`SyncStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    pub interrupts: u64,
    pub host_commands: u64,
    pub guest_commands: u64,
    pub protocol_anomalies: u64,
    pub transport_errors: u64,
    pub dropped_commands: u64,
    pub timelines_created: u64,
    pub fences_created: u64,
    pub fences_signaled: u64,
}

/// Counters for the sync engine.
///
/// Updated from both the interrupt thread and the dispatcher; all updates are relaxed.
#[derive(Debug, Default)]
pub struct SyncStats {
    interrupts: AtomicU64,
    host_commands: AtomicU64,
    guest_commands: AtomicU64,
    /// Non-positive increments and unknown/unsupported opcodes.
    protocol_anomalies: AtomicU64,
    transport_errors: AtomicU64,
    /// Host commands addressed to a timeline that is no longer registered.
    dropped_commands: AtomicU64,
    timelines_created: AtomicU64,
    fences_created: AtomicU64,
    fences_signaled: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_interrupts(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_host_commands(&self) {
        self.host_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_guest_commands(&self) {
        self.guest_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_protocol_anomalies(&self) {
        self.protocol_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transport_errors(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped_commands(&self) {
        self.dropped_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timelines_created(&self) {
        self.timelines_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fences_created(&self) {
        self.fences_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fences_signaled(&self, n: u64) {
        self.fences_signaled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            host_commands: self.host_commands.load(Ordering::Relaxed),
            guest_commands: self.guest_commands.load(Ordering::Relaxed),
            protocol_anomalies: self.protocol_anomalies.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            dropped_commands: self.dropped_commands.load(Ordering::Relaxed),
            timelines_created: self.timelines_created.load(Ordering::Relaxed),
            fences_created: self.fences_created.load(Ordering::Relaxed),
            fences_signaled: self.fences_signaled.load(Ordering::Relaxed),
        }
    }
}
