//! src/scheduler/mod.rs
//!
//! The scheduling core: work-queue distribution, process/thread fan-out,
//! result relay, and run-to-completion orchestration.
//!
//! # Module Structure
//!
//! ```text
//! src/scheduler/
//! ├── mod.rs          # Public API exports
//! ├── config.rs       # SchedulerConfig, worker-count resolution, policy hooks
//! ├── runner.rs       # ParallelScheduler and the run protocol
//! ├── relay.rs        # ResultRelay consumer thread
//! ├── stats.rs        # RunStats tallies and RunSummary
//! ├── queue/
//! │   ├── mod.rs      # SharedQueue (direct / broker-backed), work entries
//! │   ├── local.rs    # JoinQueue: FIFO + in-flight tracking + join
//! │   ├── wire.rs     # Broker frame protocol and the run manifest
//! │   ├── broker.rs   # StateBroker: the controlling process's state service
//! │   └── client.rs   # BrokerClient and typed queue/counter handles
//! └── workers/
//!     ├── mod.rs      # Shared worker constants
//!     ├── thread.rs   # ThreadWorker: fetch → execute → report loop
//!     └── process.rs  # ProcessWorkerPool and the worker-process entry
//! ```
//!
//! Two nested scheduling levels: worker *processes* (true parallelism, no
//! shared memory except the broker-backed queues and counters) each running
//! several worker *threads* (shared memory within the process). A run with a
//! resolved worker count of 1 skips the process layer entirely and drains
//! the queue on in-process threads with direct reporting.

mod config;
mod relay;
mod runner;
mod stats;
pub mod queue;
pub(crate) mod workers;

pub use config::{
    LaunchMode, PlatformPolicy, SchedulerConfig, SchedulerConfigBuilder, WorkerSpec,
    AUTO_TESTS_PER_WORKER,
};
pub use runner::{ParallelScheduler, RunOutcome};
pub use stats::{RunStats, RunSummary};
