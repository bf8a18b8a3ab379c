//! Process- and thread-parallel test execution scheduling.
//!
//! Given a flat list of independent test items, `parallel_harness`
//! distributes them across a bounded set of worker processes, each running a
//! bounded set of concurrent worker threads, and funnels every outcome back
//! into a single reporting stream in the controlling process.
//!
//! Test discovery, the per-test execution routine, and report rendering are
//! all external collaborators: callers hand the scheduler a [`Session`]
//! holding the item list, a [`TestRunner`] that knows how to execute one item,
//! and a [`ReportHook`] that records one [`TestReport`] per item.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │     Session      │ (items, runner, report hook)
//!                  └────────┬─────────┘
//!                           │
//!                           ↓
//!                 ┌───────────────────┐
//!                 │ ParallelScheduler │ ←── SchedulerConfig (workers,
//!                 └────────┬──────────┘      tests_per_worker, policy)
//!                          │ enqueues item indices + stop sentinels
//!                          ↓
//!                   ┌─────────────┐
//!                   │  WorkQueue  │ (shared FIFO, broker-backed when
//!                   └──────┬──────┘  crossing the process boundary)
//!                          │
//!            ┌─────────────┼─────────────┐
//!            ↓             ↓             ↓
//!      [worker process] [worker process] ...   (ProcessWorkerPool)
//!        ╎ thread ╎ thread ╎                    (ThreadWorkers)
//!            │             │
//!            │ serialized TestReports / captured failures
//!            ↓             ↓
//!                   ┌─────────────┐
//!                   │ ResultRelay │ (single consumer thread replaying
//!                   └──────┬──────┘  reports through the hook)
//!                          ↓
//!                    ReportHook + RunStats
//! ```
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(items, Arc::new(runner), Arc::new(hook));
//! let config = SchedulerConfig::builder()
//!     .workers(WorkerSpec::Auto)
//!     .tests_per_worker(WorkerSpec::Fixed(4))
//!     .build();
//!
//! match ParallelScheduler::new(config).run(&session)? {
//!     RunOutcome::Completed(summary) => std::process::exit(summary.exit_code()),
//!     // This process was re-executed as a worker; just exit cleanly.
//!     RunOutcome::Worker => {}
//! }
//! ```

pub mod counter;
pub mod environ;
pub mod errors;
pub mod isolation;
pub mod report;
pub mod scheduler;
pub mod session;

pub use counter::{CompareOp, SafeCounter};
pub use environ::{EnvError, ThreadLocalEnviron, RESERVED_KEY};
pub use errors::{CapturedFailure, SchedulerError};
pub use report::{Outcome, ResultEvent, TestReport};
pub use scheduler::{
    LaunchMode, ParallelScheduler, PlatformPolicy, RunOutcome, RunSummary, SchedulerConfig,
    SchedulerConfigBuilder, WorkerSpec,
};
pub use session::{ReportHook, Session, TestItem, TestRunner, WorkerContext};
