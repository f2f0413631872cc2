use thiserror::Error;

use crate::timeline::TimelineHandle;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced to callers of the sync device.
///
/// Protocol anomalies reported by the host (non-positive increments, unknown opcodes, commands for
/// timelines that no longer exist) never show up here; they are logged and counted by the
/// interrupt loop instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("timeline {0} is no longer registered")]
    TimelineClosed(TimelineHandle),

    #[error("register transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("interrupt wait failed: {0}")]
    Interrupt(#[from] InterruptError),

    #[error("interrupt thread is already running")]
    InterruptThreadRunning,

    #[error("failed to spawn interrupt thread: {0}")]
    ThreadSpawn(String),

    #[error("device is shutting down")]
    ShuttingDown,
}

/// MMIO access failure on the sync device's register window.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("register read at offset {offset:#x} failed")]
    Read { offset: u64 },

    #[error("register write at offset {offset:#x} failed")]
    Write { offset: u64 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterruptError {
    #[error("interrupt object was destroyed")]
    Destroyed,

    #[error("{0}")]
    Wait(String),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    /// The driver side of the pair was released before it signaled.
    #[error("peer closed before signaling")]
    PeerClosed,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}
