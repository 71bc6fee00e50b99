//! Bounded task queue shared by the worker pools.
//!
//! Lock-free `ArrayQueue` for the items, a `Notify` to park idle
//! workers. `try_push` never blocks: a full queue hands the task back so
//! the caller can count the drop and move on.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Why a push was refused. Carries the task back to the caller.
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

pub struct TaskQueue<T> {
    items: ArrayQueue<T>,
    notify: Notify,
    accepting: AtomicBool,
    dropped: AtomicU64,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking submit, callable from any thread.
    pub fn try_push(&self, task: T) -> Result<(), PushError<T>> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PushError::Closed(task));
        }
        match self.items.push(task) {
            Ok(()) => {
                self.notify.notify_one();
                Ok(())
            }
            Err(task) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Full(task))
            }
        }
    }

    /// Await the next task. Returns `None` once the queue is closed and
    /// drained, which is the workers' signal to exit.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if let Some(task) = self.items.pop() {
                return Some(task);
            }
            if !self.accepting.load(Ordering::Acquire) {
                return None;
            }
            let notified = self.notify.notified();
            // A push may have landed between the failed pop and the
            // notified registration.
            if let Some(task) = self.items.pop() {
                return Some(task);
            }
            if !self.accepting.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting work and wake every parked worker. Queued tasks
    /// still drain.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
