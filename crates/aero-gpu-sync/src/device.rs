//! The sync device: timeline registry, command channel and interrupt loop.
//!
//! Locking: the command lock (staging queue) is always taken before the register lock
//! (transport). The registry lock and the per-timeline locks are never held together with either
//! of them, and no path holds two timeline locks at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::command::{GuestCommand, HostCommand, HostOpcode};
use crate::config::SyncDeviceConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::{InterruptError, Result, SyncError, TransportError};
use crate::interrupt::{InterruptEvent, InterruptWait};
use crate::queue::CommandQueue;
use crate::stats::{SyncStats, SyncStatsSnapshot};
use crate::timeline::{SyncTimeline, TimelineHandle};
use crate::transport::RegisterTransport;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Register transport plus the host command staging queue.
pub(crate) struct CommandChannel {
    /// Command lock.
    staged: Mutex<CommandQueue>,
    /// Register lock.
    transport: Mutex<Box<dyn RegisterTransport + Send>>,
    stats: Arc<SyncStats>,
}

impl CommandChannel {
    pub(crate) fn new(transport: Box<dyn RegisterTransport + Send>, stats: Arc<SyncStats>) -> Self {
        Self {
            staged: Mutex::new(CommandQueue::new()),
            transport: Mutex::new(transport),
            stats,
        }
    }

    pub(crate) fn send_guest_command(&self, cmd: &GuestCommand) -> Result<()> {
        let _staged = lock(&self.staged);
        let mut transport = lock(&self.transport);
        if let Err(err) = transport.write_command(cmd) {
            self.stats.inc_transport_errors();
            tracing::warn!(
                error = %err,
                timeline = cmd.timeline_handle,
                "failed to send guest command"
            );
            return Err(err.into());
        }
        self.stats.inc_guest_commands();
        Ok(())
    }

    /// Drain host commands into the staging queue and report whether a dispatch is owed.
    fn read_commands(&self, can_read_multiple: bool) -> std::result::Result<bool, TransportError> {
        let mut staged = lock(&self.staged);
        let mut transport = lock(&self.transport);
        while let Some(cmd) = transport.read_command()? {
            if !can_read_multiple {
                transport.acknowledge()?;
            }
            staged.push(cmd);
            if !can_read_multiple {
                break;
            }
        }
        Ok(staged.take_dispatch_pending())
    }

    fn pop_staged(&self) -> Option<HostCommand> {
        lock(&self.staged).pop()
    }
}

struct TimelineRegistry {
    next_handle: u64,
    timelines: HashMap<TimelineHandle, Arc<SyncTimeline>>,
}

struct DeviceShared {
    config: SyncDeviceConfig,
    channel: Arc<CommandChannel>,
    registry: Mutex<TimelineRegistry>,
    dispatcher: DispatcherHandle,
    stats: Arc<SyncStats>,
    shutting_down: AtomicBool,
}

impl DeviceShared {
    fn lookup(&self, handle: TimelineHandle) -> Option<Arc<SyncTimeline>> {
        lock(&self.registry).timelines.get(&handle).cloned()
    }

    fn service_interrupt(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        self.stats.inc_interrupts();

        match self
            .channel
            .read_commands(self.config.can_read_multiple_commands)
        {
            Ok(true) => self.handle_staged_commands(),
            Ok(false) => {}
            Err(err) => {
                self.stats.inc_transport_errors();
                tracing::warn!(error = %err, "abandoning interrupt cycle: host command read failed");
            }
        }
    }

    fn handle_staged_commands(&self) {
        while let Some(cmd) = self.channel.pop_staged() {
            self.run_host_command(cmd);
        }
    }

    fn run_host_command(&self, cmd: HostCommand) {
        self.stats.inc_host_commands();

        match cmd.kind() {
            Some(HostOpcode::SyncTimelineInc) => {
                let handle = TimelineHandle::from_raw(cmd.timeline_handle);
                let Some(timeline) = self.lookup(handle) else {
                    // The client already closed this timeline.
                    self.stats.inc_dropped_commands();
                    tracing::debug!(timeline = %handle, "dropping increment for unknown timeline");
                    return;
                };
                if cmd.increase_step <= 0 {
                    self.stats.inc_protocol_anomalies();
                }
                timeline.increase(cmd.increase_step);
            }
            Some(op) => {
                self.stats.inc_protocol_anomalies();
                tracing::warn!(
                    ?op,
                    timeline = cmd.timeline_handle,
                    "unsupported host command"
                );
            }
            None => {
                self.stats.inc_protocol_anomalies();
                tracing::warn!(opcode = cmd.opcode, "unknown host command opcode");
            }
        }
    }
}

fn interrupt_loop(
    shared: &DeviceShared,
    irq: &dyn InterruptWait,
) -> std::result::Result<(), InterruptError> {
    tracing::debug!("sync interrupt loop started");
    loop {
        match irq.wait() {
            Ok(InterruptEvent::Interrupt) => {}
            Ok(InterruptEvent::Teardown) => break,
            Err(err) => {
                tracing::error!(error = %err, "interrupt wait failed; stopping sync interrupt loop");
                return Err(err);
            }
        }
        if shared.shutting_down.load(Ordering::Acquire) {
            break;
        }
        shared.service_interrupt();
    }
    tracing::debug!("sync interrupt loop stopped");
    Ok(())
}

struct InterruptThread {
    irq: Arc<dyn InterruptWait>,
    join: JoinHandle<std::result::Result<(), InterruptError>>,
}

/// Guest-side sync device.
///
/// Clients create timelines here and attach fences to them; the host advances timelines through
/// commands delivered on the device interrupt. The interrupt can be serviced by a dedicated thread
/// ([`SyncDevice::start_interrupt_thread`]) or driven manually with
/// [`SyncDevice::service_interrupt`].
pub struct SyncDevice {
    shared: Arc<DeviceShared>,
    irq_thread: Mutex<Option<InterruptThread>>,
}

impl SyncDevice {
    /// Create the device and perform the init handshake.
    ///
    /// `dispatcher` is where peer-closed callbacks for fences run.
    pub fn new(
        config: SyncDeviceConfig,
        transport: impl RegisterTransport + Send + 'static,
        dispatcher: DispatcherHandle,
    ) -> Result<Self> {
        let mut transport: Box<dyn RegisterTransport + Send> = Box::new(transport);
        transport.init()?;

        let stats = Arc::new(SyncStats::new());
        let channel = Arc::new(CommandChannel::new(transport, stats.clone()));
        tracing::info!(
            batch_reads = config.can_read_multiple_commands,
            "sync device initialized"
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                config,
                channel,
                registry: Mutex::new(TimelineRegistry {
                    next_handle: 1,
                    timelines: HashMap::new(),
                }),
                dispatcher,
                stats,
                shutting_down: AtomicBool::new(false),
            }),
            irq_thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncDeviceConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Allocate and register a new timeline.
    pub fn create_timeline(&self) -> Result<Arc<SyncTimeline>> {
        let shared = &self.shared;
        let mut registry = lock(&shared.registry);
        // `shutdown` raises the flag before it drains the registry under this lock.
        if self.is_shutting_down() {
            return Err(SyncError::ShuttingDown);
        }
        if registry.timelines.len() >= shared.config.max_timelines {
            tracing::warn!(limit = shared.config.max_timelines, "timeline limit reached");
            return Err(SyncError::ResourceExhausted("timeline registry full"));
        }
        registry
            .timelines
            .try_reserve(1)
            .map_err(|_| SyncError::ResourceExhausted("timeline registry allocation"))?;
        let raw = registry.next_handle;
        registry.next_handle = raw
            .checked_add(1)
            .ok_or(SyncError::ResourceExhausted("timeline handles"))?;

        let handle = TimelineHandle::from_raw(raw);
        let timeline = Arc::new(SyncTimeline::new(
            handle,
            shared.channel.clone(),
            shared.dispatcher.clone(),
            shared.stats.clone(),
            shared.config.max_fences_per_timeline,
        ));
        registry.timelines.insert(handle, timeline.clone());
        drop(registry);

        shared.stats.inc_timelines_created();
        tracing::debug!(timeline = %handle, "created sync timeline");
        Ok(timeline)
    }

    pub fn timeline(&self, handle: TimelineHandle) -> Option<Arc<SyncTimeline>> {
        self.shared.lookup(handle)
    }

    pub fn timeline_count(&self) -> usize {
        lock(&self.shared.registry).timelines.len()
    }

    /// Unregister a timeline once its client channel has closed.
    ///
    /// The timeline stops accepting fences; it stays alive until its outstanding fences are
    /// closed. Returns `false` if `handle` was not registered.
    pub fn remove_timeline(&self, handle: TimelineHandle) -> bool {
        let removed = lock(&self.shared.registry).timelines.remove(&handle);
        match removed {
            Some(timeline) => {
                timeline.unregister();
                tracing::debug!(
                    timeline = %handle,
                    outstanding_fences = timeline.fence_count(),
                    "unregistered sync timeline"
                );
                true
            }
            None => false,
        }
    }

    pub fn send_guest_command(&self, cmd: &GuestCommand) -> Result<()> {
        self.shared.channel.send_guest_command(cmd)
    }

    /// Run one interrupt cycle: drain host commands, then dispatch them in arrival order.
    ///
    /// No-op once teardown has begun.
    pub fn service_interrupt(&self) {
        self.shared.service_interrupt();
    }

    pub fn run_host_command(&self, cmd: HostCommand) {
        self.shared.run_host_command(cmd);
    }

    /// Spawn the interrupt servicing thread.
    pub fn start_interrupt_thread(&self, irq: Arc<dyn InterruptWait>) -> Result<()> {
        let mut slot = lock(&self.irq_thread);
        if slot.is_some() {
            return Err(SyncError::InterruptThreadRunning);
        }
        if self.is_shutting_down() {
            return Err(SyncError::ShuttingDown);
        }

        let shared = self.shared.clone();
        let thread_irq = irq.clone();
        let join = std::thread::Builder::new()
            .name(self.shared.config.interrupt_thread_name.clone())
            .spawn(move || interrupt_loop(&shared, thread_irq.as_ref()))
            .map_err(|err| SyncError::ThreadSpawn(err.to_string()))?;

        *slot = Some(InterruptThread { irq, join });
        Ok(())
    }

    /// Stop the interrupt loop, unregister every timeline and release their fences.
    ///
    /// Idempotent. Reports an interrupt primitive failure that ended the loop early.
    pub fn shutdown(&self) -> Result<()> {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut result = Ok(());
        let thread = lock(&self.irq_thread).take();
        if let Some(thread) = thread {
            thread.irq.cancel();
            match thread.join.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => result = Err(SyncError::Interrupt(err)),
                Err(_) => tracing::error!("sync interrupt thread panicked"),
            }
        }

        let timelines: Vec<Arc<SyncTimeline>> = lock(&self.shared.registry)
            .timelines
            .drain()
            .map(|(_, timeline)| timeline)
            .collect();
        for timeline in &timelines {
            timeline.unregister();
            timeline.release_fences();
        }
        tracing::info!(timelines = timelines.len(), "sync device shut down");
        result
    }
}

impl Drop for SyncDevice {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "sync device teardown reported an error");
        }
    }
}

impl std::fmt::Debug for SyncDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDevice")
            .field("config", &self.shared.config)
            .field("timelines", &self.timeline_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
