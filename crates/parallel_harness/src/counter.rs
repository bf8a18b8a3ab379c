//! Process-shared, lock-protected integer counter.
//!
//! Every operation acquires a single lock for its full duration, so no
//! caller can observe a value mid-modification, including across process
//! boundaries, where the lock lives broker-side and all access is serialized
//! through it. Comparison is a plain named method rather than operator
//! overloading; the contract is the lock discipline, not the sugar.

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::scheduler::queue::client::BrokerCounter;

/// Comparison operator accepted by [`SafeCounter::compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
}

impl CompareOp {
    pub(crate) fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }
}

/// A shared integer counter usable from any thread or process.
///
/// Cloning yields another handle onto the same underlying value. The local
/// backend is an in-process mutex; the broker backend serializes every
/// operation through the controlling process's state broker, which holds the
/// authoritative lock.
#[derive(Clone)]
pub struct SafeCounter {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Local(Arc<Mutex<i64>>),
    Broker(BrokerCounter),
}

impl SafeCounter {
    pub fn new(initial: i64) -> Self {
        Self {
            backend: Backend::Local(Arc::new(Mutex::new(initial))),
        }
    }

    /// Wraps a broker-side counter handle.
    pub(crate) fn attached(counter: BrokerCounter) -> Self {
        Self {
            backend: Backend::Broker(counter),
        }
    }

    /// Adds `n` and returns the new value.
    pub fn add(&self, n: i64) -> Result<i64> {
        match &self.backend {
            Backend::Local(value) => {
                let mut guard = value.lock();
                *guard += n;
                Ok(*guard)
            }
            Backend::Broker(counter) => counter.add(n),
        }
    }

    /// Adds `n` in place.
    pub fn increment(&self, n: i64) -> Result<()> {
        self.add(n).map(|_| ())
    }

    /// Compares the current value against `rhs` under the counter's lock.
    pub fn compare(&self, op: CompareOp, rhs: i64) -> Result<bool> {
        match &self.backend {
            Backend::Local(value) => Ok(op.evaluate(*value.lock(), rhs)),
            Backend::Broker(counter) => counter.compare(op, rhs),
        }
    }

    /// Snapshot-read of the current value.
    pub fn value(&self) -> Result<i64> {
        match &self.backend {
            Backend::Local(value) => Ok(*value.lock()),
            Backend::Broker(counter) => counter.value(),
        }
    }
}
