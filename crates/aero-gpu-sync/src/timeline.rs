//! Sync timelines and the fences hung off them.
//!
//! A timeline is a monotonic 64-bit counter advanced by the host. Each fence waits for the counter
//! to reach its target; fences that have not matured yet live in `active` ordered by
//! `(target, creation order)`, matured ones move to `inactive` and stay there until the client
//! closes its observer.
//!
//! Ownership: the device registry holds one `Arc<SyncTimeline>` while the timeline is registered,
//! and every fence's peer-closed waiter holds another. The timeline is freed once both are gone.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command::GuestCommand;
use crate::device::CommandChannel;
use crate::dispatcher::DispatcherHandle;
use crate::error::{Result, SyncError};
use crate::signal::FenceSignal;
use crate::stats::SyncStats;

/// Device-assigned timeline identifier, as carried in the command registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineHandle(u64);

impl TimelineHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct FenceId(u64);

struct Fence {
    id: FenceId,
    signal: FenceSignal,
}

struct TimelineState {
    seqno: u64,
    registered: bool,
    next_fence_id: u64,
    active: BTreeMap<(u64, FenceId), Fence>,
    inactive: HashMap<FenceId, Fence>,
    fences_signaled: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineSnapshot {
    pub handle: TimelineHandle,
    pub seqno: u64,
    pub registered: bool,
    /// Targets of unsignaled fences, in maturation order.
    pub active_targets: Vec<u64>,
    pub inactive_fences: usize,
    pub fences_signaled: u64,
}

pub struct SyncTimeline {
    handle: TimelineHandle,
    channel: Arc<CommandChannel>,
    dispatcher: DispatcherHandle,
    stats: Arc<SyncStats>,
    max_fences: usize,
    state: Mutex<TimelineState>,
}

impl SyncTimeline {
    pub(crate) fn new(
        handle: TimelineHandle,
        channel: Arc<CommandChannel>,
        dispatcher: DispatcherHandle,
        stats: Arc<SyncStats>,
        max_fences: usize,
    ) -> Self {
        Self {
            handle,
            channel,
            dispatcher,
            stats,
            max_fences,
            state: Mutex::new(TimelineState {
                seqno: 0,
                registered: true,
                next_fence_id: 0,
                active: BTreeMap::new(),
                inactive: HashMap::new(),
                fences_signaled: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn handle(&self) -> TimelineHandle {
        self.handle
    }

    pub fn seqno(&self) -> u64 {
        self.lock().seqno
    }

    pub fn is_registered(&self) -> bool {
        self.lock().registered
    }

    /// Number of fences still tracked (matured or not).
    pub fn fence_count(&self) -> usize {
        let state = self.lock();
        state.active.len() + state.inactive.len()
    }

    /// Attach a fence that signals `signal` once the timeline reaches `target_seqno`.
    ///
    /// `None` waits for the next increment. A target the timeline already passed signals
    /// immediately. The fence is torn down when the client drops the paired observer.
    pub fn create_fence(
        self: &Arc<Self>,
        signal: FenceSignal,
        target_seqno: Option<u64>,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.registered {
            return Err(SyncError::TimelineClosed(self.handle));
        }
        if state.active.len() + state.inactive.len() >= self.max_fences {
            tracing::warn!(timeline = %self.handle, limit = self.max_fences, "fence limit reached");
            return Err(SyncError::ResourceExhausted("fences per timeline"));
        }

        let target = target_seqno.unwrap_or_else(|| state.seqno.saturating_add(1));
        let matured = target <= state.seqno;
        if matured {
            state
                .inactive
                .try_reserve(1)
                .map_err(|_| SyncError::ResourceExhausted("fence set allocation"))?;
        }

        let id = FenceId(state.next_fence_id);
        state.next_fence_id += 1;

        let timeline = Arc::clone(self);
        signal.wait_peer_closed(&self.dispatcher, move || {
            timeline.erase_fence(id, target);
        });

        let fence = Fence { id, signal };
        if matured {
            fence.signal.signal();
            state.fences_signaled += 1;
            self.stats.add_fences_signaled(1);
            state.inactive.insert(id, fence);
        } else {
            state.active.insert((target, id), fence);
        }
        self.stats.inc_fences_created();

        tracing::trace!(
            timeline = %self.handle,
            target,
            seqno = state.seqno,
            matured,
            "created fence"
        );
        Ok(())
    }

    /// Advance the timeline by `step` and signal every fence that matured, smallest target
    /// first. Returns the number of fences signaled.
    ///
    /// Non-positive steps leave the timeline untouched.
    pub fn increase(&self, step: i64) -> usize {
        if step <= 0 {
            tracing::warn!(timeline = %self.handle, step, "ignoring non-positive timeline increment");
            return 0;
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        state.seqno = state.seqno.saturating_add(step as u64);
        let seqno = state.seqno;

        let mut matured = 0usize;
        while let Some(entry) = state.active.first_entry() {
            if entry.key().0 > seqno {
                break;
            }
            let ((target, _), fence) = entry.remove_entry();
            fence.signal.signal();
            tracing::trace!(timeline = %self.handle, target, "fence signaled");
            state.inactive.insert(fence.id, fence);
            matured += 1;
        }

        state.fences_signaled += matured as u64;
        self.stats.add_fences_signaled(matured as u64);
        matured
    }

    /// Ask the host to send an increment once its progress reaches `target_seqno`.
    pub fn trigger_host_wait(&self, target_seqno: u64) -> Result<()> {
        self.channel
            .send_guest_command(&GuestCommand::trigger_host_wait(self.handle, target_seqno))
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        let state = self.lock();
        TimelineSnapshot {
            handle: self.handle,
            seqno: state.seqno,
            registered: state.registered,
            active_targets: state.active.keys().map(|(target, _)| *target).collect(),
            inactive_fences: state.inactive.len(),
            fences_signaled: state.fences_signaled,
        }
    }

    pub(crate) fn unregister(&self) {
        self.lock().registered = false;
    }

    /// Drop every fence and cancel their peer-closed waits. Used on device teardown.
    pub(crate) fn release_fences(&self) {
        let fences: Vec<Fence> = {
            let mut state = self.lock();
            let active = std::mem::take(&mut state.active);
            let inactive = std::mem::take(&mut state.inactive);
            active.into_values().chain(inactive.into_values()).collect()
        };
        // Cancelled callbacks own timeline references; drop them with the lock released.
        for fence in &fences {
            fence.signal.cancel_peer_closed_wait();
        }
        drop(fences);
    }

    fn erase_fence(&self, id: FenceId, target: u64) {
        let removed = {
            let mut state = self.lock();
            state
                .active
                .remove(&(target, id))
                .or_else(|| state.inactive.remove(&id))
        };
        if removed.is_none() {
            tracing::trace!(timeline = %self.handle, "peer-closed fence already released");
        }
    }
}

impl fmt::Debug for SyncTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SyncTimeline")
            .field("handle", &self.handle)
            .field("seqno", &state.seqno)
            .field("registered", &state.registered)
            .field("active", &state.active.len())
            .field("inactive", &state.inactive.len())
            .finish()
    }
}
