//! Worker fan-out: the per-thread pull-execute-report loop and the process
//! pool that hosts it.
//!
//! - `thread`: `ThreadWorker`, one per concurrent test slot
//! - `process`: `ProcessWorkerPool` and the worker-process entry point

pub(crate) mod process;
pub(crate) mod thread;

/// Broker counter bumped once per report a worker emits; the scheduler
/// compares it against the number of reports actually replayed.
pub(crate) const REPORTED_COUNTER: &str = "reported";
