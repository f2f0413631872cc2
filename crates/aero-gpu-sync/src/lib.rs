//! Fence synchronization engine for the paravirtualized GPU sync device.
//!
//! The guest creates [`SyncTimeline`]s on a [`SyncDevice`] and hangs fences off them. The host
//! advances timelines by posting `SYNC_TIMELINE_INC` commands through the device's register window
//! and raising an interrupt; the device's interrupt loop drains those commands and matures every
//! fence whose target has been reached. In the other direction a timeline can ask the host to
//! report progress ([`SyncTimeline::trigger_host_wait`]).
//!
//! Two contexts touch the engine:
//! - the interrupt thread ([`SyncDevice::start_interrupt_thread`]), which performs register I/O
//!   and advances timelines, and
//! - a cooperative [`Dispatcher`], on which client requests and fence peer-closed callbacks run.
//!
//! Fences are signaled through a paired primitive ([`signal_pair`]): the engine owns the
//! [`FenceSignal`] half and the client keeps the [`FenceObserver`]. Dropping the observer tears the
//! fence down.
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod interrupt;
pub mod queue;
pub mod regs;
pub mod signal;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod timeline;
pub mod transport;

pub use command::{GuestCommand, HostCommand, HostOpcode};
pub use config::SyncDeviceConfig;
pub use device::SyncDevice;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{ConfigError, InterruptError, Result, SignalError, SyncError, TransportError};
pub use interrupt::{InterruptEvent, InterruptWait, SoftInterrupt};
pub use queue::CommandQueue;
pub use signal::{signal_pair, FenceObserver, FenceSignal};
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use timeline::{SyncTimeline, TimelineHandle, TimelineSnapshot};
pub use transport::{MmioRegisterTransport, RegisterTransport, SyncMmio};
