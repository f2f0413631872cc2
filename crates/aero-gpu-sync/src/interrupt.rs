use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::InterruptError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptEvent {
    /// The device raised its interrupt line.
    Interrupt,
    /// [`InterruptWait::cancel`] was called; the waiter should stop.
    Teardown,
}

/// Blocking wait on the device interrupt.
pub trait InterruptWait: Send + Sync {
    fn wait(&self) -> Result<InterruptEvent, InterruptError>;

    /// Wake any current or future waiter with [`InterruptEvent::Teardown`].
    fn cancel(&self);
}

#[derive(Debug, Default)]
struct IrqState {
    pending: u64,
    cancelled: bool,
    destroyed: bool,
}

/// Software interrupt object.
///
/// Every [`SoftInterrupt::trigger`] is delivered as one wake-up; triggers raised while nobody is
/// waiting are counted, not coalesced. Cancellation takes priority over pending interrupts.
#[derive(Debug, Default)]
pub struct SoftInterrupt {
    state: Mutex<IrqState>,
    cond: Condvar,
}

impl SoftInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IrqState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn trigger(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_add(1);
        drop(state);
        self.cond.notify_one();
    }

    /// Make the interrupt object unusable; waiters fail with [`InterruptError::Destroyed`].
    pub fn destroy(&self) {
        self.lock().destroyed = true;
        self.cond.notify_all();
    }

    pub fn pending(&self) -> u64 {
        self.lock().pending
    }
}

impl InterruptWait for SoftInterrupt {
    fn wait(&self) -> Result<InterruptEvent, InterruptError> {
        let mut state = self.lock();
        loop {
            if state.destroyed {
                return Err(InterruptError::Destroyed);
            }
            if state.cancelled {
                return Ok(InterruptEvent::Teardown);
            }
            if state.pending > 0 {
                state.pending -= 1;
                return Ok(InterruptEvent::Interrupt);
            }
            state = match self.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn cancel(&self) {
        self.lock().cancelled = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn triggers_are_counted() {
        let irq = SoftInterrupt::new();
        irq.trigger();
        irq.trigger();
        assert_eq!(irq.pending(), 2);
        assert_eq!(irq.wait(), Ok(InterruptEvent::Interrupt));
        assert_eq!(irq.wait(), Ok(InterruptEvent::Interrupt));
        assert_eq!(irq.pending(), 0);
    }

    #[test]
    fn cancel_wins_over_pending_interrupts() {
        let irq = SoftInterrupt::new();
        irq.trigger();
        irq.cancel();
        assert_eq!(irq.wait(), Ok(InterruptEvent::Teardown));
        // Sticky.
        assert_eq!(irq.wait(), Ok(InterruptEvent::Teardown));
    }

    #[test]
    fn cancel_wakes_blocked_waiter() {
        let irq = Arc::new(SoftInterrupt::new());
        let waiter = {
            let irq = irq.clone();
            std::thread::spawn(move || irq.wait())
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        irq.cancel();
        assert_eq!(waiter.join().unwrap(), Ok(InterruptEvent::Teardown));
    }

    #[test]
    fn destroyed_interrupt_fails_wait() {
        let irq = SoftInterrupt::new();
        irq.destroy();
        assert_eq!(irq.wait(), Err(InterruptError::Destroyed));
    }
}
