//! src/scheduler/queue/mod.rs
//!
//! The shared work queue and its two backings.
//!
//! `SharedQueue<T>` presents one FIFO-with-completion-tracking contract over
//! two transports: a direct in-process queue (single-worker mode, and the
//! broker's own storage) and a broker-backed handle reached over a loopback
//! connection (everything that crosses the process boundary). Consumers
//! acknowledge every popped entry with `task_done`; `join` returns only once
//! the queue is empty and nothing remains unacknowledged.

pub mod broker;
pub mod client;
pub mod local;
pub mod wire;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use client::BrokerQueue;
use local::JoinQueue;
pub use local::QueueError;

/// One entry on the work queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entry {
    /// Index of an item to execute.
    Item(usize),
    /// No more work for the consumer that pops this.
    Stop,
}

/// A FIFO shared between threads and, in broker form, between processes.
pub enum SharedQueue<T> {
    Direct(Arc<JoinQueue<T>>),
    Broker(BrokerQueue<T>),
}

impl<T: Serialize + DeserializeOwned> SharedQueue<T> {
    pub fn put(&self, value: T) -> Result<()> {
        match self {
            SharedQueue::Direct(queue) => {
                queue.put(value);
                Ok(())
            }
            SharedQueue::Broker(queue) => queue.put(&value),
        }
    }

    /// Blocks until an entry is available.
    pub fn get(&self) -> Result<T> {
        match self {
            SharedQueue::Direct(queue) => Ok(queue.get()),
            SharedQueue::Broker(queue) => queue.get(),
        }
    }

    /// Fails with [`QueueError::Empty`] (downcastable) if nothing is queued.
    pub fn get_nowait(&self) -> Result<T> {
        match self {
            SharedQueue::Direct(queue) => queue.get_nowait().map_err(Into::into),
            SharedQueue::Broker(queue) => queue.get_nowait(),
        }
    }

    pub fn task_done(&self) -> Result<()> {
        match self {
            SharedQueue::Direct(queue) => queue.task_done().map_err(Into::into),
            SharedQueue::Broker(queue) => queue.task_done(),
        }
    }

    /// Blocks until every entry has been acknowledged.
    pub fn join(&self) -> Result<()> {
        match self {
            SharedQueue::Direct(queue) => {
                queue.join();
                Ok(())
            }
            SharedQueue::Broker(queue) => queue.join(),
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            SharedQueue::Direct(queue) => Ok(queue.len()),
            SharedQueue::Broker(queue) => queue.len(),
        }
    }
}

impl<T> Clone for SharedQueue<T> {
    fn clone(&self) -> Self {
        match self {
            // Same underlying queue.
            SharedQueue::Direct(queue) => SharedQueue::Direct(queue.clone()),
            // Same broker queue, independent connection.
            SharedQueue::Broker(queue) => SharedQueue::Broker(queue.clone()),
        }
    }
}

/// Whether an error is the queue's empty signal.
pub fn is_empty_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<QueueError>(), Some(QueueError::Empty))
}
