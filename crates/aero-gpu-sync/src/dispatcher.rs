//! Cooperative single-threaded dispatcher.
//!
//! Client operations and peer-closed callbacks are posted as tasks and run one at a time, to
//! completion, on whichever thread drives the [`Dispatcher`]. Tasks never interleave with each
//! other, but they do run concurrently with the device's interrupt thread.

use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task(Task),
    Quit,
}

pub struct Dispatcher {
    rx: Receiver<Message>,
    handle: DispatcherHandle,
    /// A quit request consumed by `run_until_idle`, still owed to the next `run`.
    quit_pending: Cell<bool>,
}

/// Cloneable, thread-safe handle used to post work onto a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: Sender<Message>,
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle").finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            handle: DispatcherHandle { tx },
            quit_pending: Cell::new(false),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Run every task that is already queued (including tasks those tasks post) and return how
    /// many ran. Never blocks.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(Message::Task(task)) => {
                    task();
                    ran += 1;
                }
                Ok(Message::Quit) => self.quit_pending.set(true),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Block running tasks until [`DispatcherHandle::quit`] is called.
    ///
    /// A quit request already drained by [`Dispatcher::run_until_idle`] makes this return
    /// immediately.
    pub fn run(&self) {
        if self.quit_pending.replace(false) {
            return;
        }
        while let Ok(msg) = self.rx.recv() {
            match msg {
                Message::Task(task) => task(),
                Message::Quit => return,
            }
        }
    }
}

impl DispatcherHandle {
    /// Queue `task`. Returns `false` (and drops the task) if the dispatcher no longer exists.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.post_boxed(Box::new(task))
    }

    pub(crate) fn post_boxed(&self, task: Task) -> bool {
        self.tx.send(Message::Task(task)).is_ok()
    }

    pub fn quit(&self) {
        let _ = self.tx.send(Message::Quit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_tasks_in_post_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            dispatcher.handle().post(move || order.lock().unwrap().push(i));
        }

        assert_eq!(dispatcher.run_until_idle(), 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(dispatcher.run_until_idle(), 0);
    }

    #[test]
    fn tasks_posted_by_tasks_run_in_same_drain() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = dispatcher.handle();
        let inner_hits = hits.clone();
        dispatcher.handle().post(move || {
            inner_hits.fetch_add(1, Ordering::SeqCst);
            let inner_hits = inner_hits.clone();
            handle.post(move || {
                inner_hits.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(dispatcher.run_until_idle(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn run_returns_on_quit() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let hits = Arc::new(AtomicUsize::new(0));

        let poster = {
            let hits = hits.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let hits = hits.clone();
                    handle.post(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                }
                handle.quit();
            })
        };

        dispatcher.run();
        poster.join().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn quit_drained_by_idle_run_still_stops_run() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let hits = Arc::new(AtomicUsize::new(0));

        handle.quit();
        let task_hits = hits.clone();
        handle.post(move || {
            task_hits.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(dispatcher.run_until_idle(), 1);

        // Returns instead of blocking on an empty queue.
        dispatcher.run();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_fails_once_dispatcher_is_gone() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        drop(dispatcher);
        // `Dispatcher` owned the only receiver.
        assert!(!handle.post(|| {}));
    }
}
