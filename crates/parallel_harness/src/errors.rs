//! Error taxonomy of the scheduling core.
//!
//! Only two of these abort a run before any test executes: a malformed
//! worker-count option and a failed collection phase. Failures that escape
//! the test runner itself are captured whole as [`CapturedFailure`] records,
//! deferred until every worker has finished, and re-raised once as
//! [`SchedulerError::WorkerFailures`] so partial results are never lost.

use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

fn plural(n: &usize) -> &'static str {
    if *n == 1 {
        ""
    } else {
        "s"
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A `workers`/`tests_per_worker` value that is neither an integer nor
    /// the literal `"auto"`. Raised before any scheduling begins.
    #[error("{option} can only be an integer or \"auto\"")]
    InvalidWorkerOption { option: &'static str },

    /// The collection phase reported failures and tolerant continuation is
    /// not configured. Raised before scheduling, no workers are started.
    #[error("{count} error{} during collection", plural(.count))]
    CollectionInterrupted { count: usize },

    /// One or more exceptions escaped test execution inside workers. Raised
    /// once, after all workers have completed, naming the total count and
    /// the first captured origin; the first capture is the source.
    #[error("parallel run got {count} error{}, raising the first from {origin}", plural(.count))]
    WorkerFailures {
        count: usize,
        origin: String,
        #[source]
        first: CapturedFailure,
    },
}

/// A failure that escaped test execution, serialized whole so it can cross
/// the process boundary: origin thread, message, and backtrace text. No live
/// references survive the trip; the receiving side reconstructs a rich error
/// from this record.
#[derive(Clone, Debug, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct CapturedFailure {
    /// Name of the worker thread the failure escaped on.
    pub origin: String,
    pub message: String,
    /// Rendered backtrace from the capture site.
    pub backtrace: String,
}

impl CapturedFailure {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }

    /// Captures an `Err` returned by the test runner.
    pub fn from_error(origin: &str, err: &anyhow::Error) -> Self {
        Self {
            origin: origin.to_string(),
            message: format!("{err:#}"),
            backtrace: err.backtrace().to_string(),
        }
    }

    /// Captures a panic payload caught with `catch_unwind`.
    pub fn from_panic(origin: &str, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(origin, message)
    }
}
