use std::collections::VecDeque;

use crate::command::HostCommand;

/// FIFO staging list for host commands read by the interrupt thread.
///
/// Besides the commands themselves the queue remembers whether a dispatch is owed: the flag is
/// raised when the queue goes from empty to non-empty and cleared by
/// [`CommandQueue::take_dispatch_pending`]. A cycle that is abandoned halfway (register failure)
/// leaves the flag raised so the next cycle still dispatches what was staged.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<HostCommand>,
    dispatch_pending: bool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: HostCommand) {
        if self.commands.is_empty() {
            self.dispatch_pending = true;
        }
        self.commands.push_back(cmd);
    }

    pub fn pop(&mut self) -> Option<HostCommand> {
        self.commands.pop_front()
    }

    /// Returns whether the queue became non-empty since the last call.
    pub fn take_dispatch_pending(&mut self) -> bool {
        std::mem::take(&mut self.dispatch_pending) && !self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelineHandle;

    fn inc(handle: u64, step: i64) -> HostCommand {
        HostCommand::timeline_inc(TimelineHandle::from_raw(handle), step)
    }

    #[test]
    fn pops_in_arrival_order() {
        let mut q = CommandQueue::new();
        q.push(inc(1, 1));
        q.push(inc(2, 2));
        q.push(inc(3, 3));

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(inc(1, 1)));
        assert_eq!(q.pop(), Some(inc(2, 2)));
        assert_eq!(q.pop(), Some(inc(3, 3)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn dispatch_pending_tracks_empty_to_non_empty_transition() {
        let mut q = CommandQueue::new();
        assert!(!q.take_dispatch_pending());

        q.push(inc(1, 1));
        q.push(inc(1, 1));
        assert!(q.take_dispatch_pending());
        // Already reported; more pushes onto a non-empty queue do not re-arm it.
        q.push(inc(1, 1));
        assert!(!q.take_dispatch_pending());

        while q.pop().is_some() {}
        q.push(inc(1, 1));
        assert!(q.take_dispatch_pending());
    }

    #[test]
    fn unreported_transition_survives_until_taken() {
        let mut q = CommandQueue::new();
        q.push(inc(1, 1));
        // A later cycle that stages nothing still sees the owed dispatch.
        assert!(q.take_dispatch_pending());
        assert!(!q.take_dispatch_pending());
    }
}
