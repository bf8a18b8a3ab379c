//! src/scheduler/queue/local.rs
//!
//! In-process FIFO with completion tracking.
//!
//! This is the queue discipline the whole scheduler is built on: every `put`
//! must eventually be matched by exactly one `task_done`, and `join` returns
//! only when the queue is empty *and* no popped entry is still
//! unacknowledged. No channel type provides that contract, so it is
//! implemented directly on a mutex and two condvars.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,
    #[error("task_done() called with no unacknowledged task")]
    NoPendingTask,
}

/// FIFO queue with an in-flight counter and a `join` primitive.
///
/// Safe for any number of producer and consumer threads. The in-flight
/// counter increments on `put` and decrements on `task_done`; consumers
/// acknowledge each entry after processing it.
pub struct JoinQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    all_done: Condvar,
}

struct Inner<T> {
    entries: VecDeque<T>,
    unfinished: usize,
}

impl<T> JoinQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                unfinished: 0,
            }),
            not_empty: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    pub fn put(&self, value: T) {
        let mut inner = self.inner.lock();
        inner.entries.push_back(value);
        inner.unfinished += 1;
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Blocks until an entry is available.
    pub fn get(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.entries.pop_front() {
                return value;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    pub fn get_nowait(&self) -> Result<T, QueueError> {
        self.inner
            .lock()
            .entries
            .pop_front()
            .ok_or(QueueError::Empty)
    }

    /// Acknowledges one previously popped entry.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.unfinished == 0 {
            return Err(QueueError::NoPendingTask);
        }
        inner.unfinished -= 1;
        if inner.unfinished == 0 {
            drop(inner);
            self.all_done.notify_all();
        }
        Ok(())
    }

    /// Blocks until every entry ever `put` has been acknowledged.
    pub fn join(&self) {
        let mut inner = self.inner.lock();
        while inner.unfinished > 0 {
            self.all_done.wait(&mut inner);
        }
    }

    /// Entries currently waiting (not yet popped).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JoinQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
