//! Paired signal primitive handed to the sync engine by its clients.
//!
//! [`signal_pair`] returns two halves sharing one state word:
//! - [`FenceSignal`] is given to a timeline as the fence's signal. The engine raises it when the
//!   fence matures.
//! - [`FenceObserver`] stays with the client. It observes the signaled state, and dropping it is
//!   the peer-closed notification the engine uses to tear the fence down.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::dispatcher::{DispatcherHandle, Task};
use crate::error::SignalError;

struct PeerClosedWait {
    dispatcher: DispatcherHandle,
    callback: Task,
}

#[derive(Default)]
struct SignalState {
    signaled: bool,
    signal_closed: bool,
    observer_closed: bool,
    peer_closed_wait: Option<PeerClosedWait>,
}

#[derive(Default)]
struct SignalShared {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl SignalShared {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Create a connected signal/observer pair.
pub fn signal_pair() -> (FenceSignal, FenceObserver) {
    let shared = Arc::new(SignalShared::default());
    (
        FenceSignal {
            shared: shared.clone(),
        },
        FenceObserver { shared },
    )
}

/// Driver-side half of a signal pair.
pub struct FenceSignal {
    shared: Arc<SignalShared>,
}

impl FenceSignal {
    /// Raise the signal. Returns `true` only for the call that actually changed the state.
    pub fn signal(&self) -> bool {
        let mut state = self.shared.lock();
        if state.signaled {
            return false;
        }
        state.signaled = true;
        drop(state);
        self.shared.cond.notify_all();
        true
    }

    pub fn is_signaled(&self) -> bool {
        self.shared.lock().signaled
    }

    pub fn is_peer_closed(&self) -> bool {
        self.shared.lock().observer_closed
    }

    /// Arrange for `callback` to be posted to `dispatcher` once the observer is dropped.
    ///
    /// If the observer is already gone the callback is posted immediately. Registering again
    /// replaces (and drops) a previously registered callback.
    pub(crate) fn wait_peer_closed(
        &self,
        dispatcher: &DispatcherHandle,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let wait = PeerClosedWait {
            dispatcher: dispatcher.clone(),
            callback: Box::new(callback),
        };

        let mut state = self.shared.lock();
        if state.observer_closed {
            drop(state);
            if !wait.dispatcher.post_boxed(wait.callback) {
                tracing::debug!("dispatcher gone; dropping peer-closed callback");
            }
            return;
        }
        let previous = state.peer_closed_wait.replace(wait);
        drop(state);
        drop(previous);
    }

    /// Drop a pending peer-closed callback without running it. Returns whether one was pending.
    pub(crate) fn cancel_peer_closed_wait(&self) -> bool {
        let wait = self.shared.lock().peer_closed_wait.take();
        wait.is_some()
    }
}

impl Drop for FenceSignal {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.signal_closed = true;
        let wait = state.peer_closed_wait.take();
        drop(state);
        self.shared.cond.notify_all();
        // The callback may own the last reference to a timeline; release it without the lock.
        drop(wait);
    }
}

impl std::fmt::Debug for FenceSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("FenceSignal")
            .field("signaled", &state.signaled)
            .field("peer_closed", &state.observer_closed)
            .finish()
    }
}

/// Client-side half of a signal pair.
pub struct FenceObserver {
    shared: Arc<SignalShared>,
}

impl FenceObserver {
    pub fn is_signaled(&self) -> bool {
        self.shared.lock().signaled
    }

    /// Whether the driver side was released. A fence released after signaling still reports
    /// [`FenceObserver::is_signaled`].
    pub fn is_peer_closed(&self) -> bool {
        self.shared.lock().signal_closed
    }

    /// Block until signaled.
    pub fn wait(&self) -> Result<(), SignalError> {
        let mut state = self.shared.lock();
        loop {
            if state.signaled {
                return Ok(());
            }
            if state.signal_closed {
                return Err(SignalError::PeerClosed);
            }
            state = match self.shared.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until signaled or `timeout` elapses. Returns `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, SignalError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if state.signaled {
                return Ok(true);
            }
            if state.signal_closed {
                return Err(SignalError::PeerClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = match self.shared.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for FenceObserver {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.observer_closed = true;
        let wait = state.peer_closed_wait.take();
        drop(state);
        if let Some(wait) = wait {
            if !wait.dispatcher.post_boxed(wait.callback) {
                tracing::debug!("dispatcher gone; dropping peer-closed callback");
            }
        }
    }
}

impl std::fmt::Debug for FenceObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("FenceObserver")
            .field("signaled", &state.signaled)
            .field("peer_closed", &state.signal_closed)
            .finish()
    }
}
