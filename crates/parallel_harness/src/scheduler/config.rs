//! src/scheduler/config.rs
//!
//! Scheduler configuration and worker-count resolution.
//!
//! Both knobs accept an integer, the literal `"auto"`, or nothing:
//!
//! - `workers = "auto"` resolves to the logical CPU count (minimum 1);
//!   unset resolves to 1.
//! - `tests_per_worker = "auto"` resolves to 50; any explicit or auto value
//!   is capped at `ceil(items / workers)` so no worker gets a thread with
//!   guaranteed-empty work; unset resolves to 1.
//!
//! Values may come from a command-line flag or a persisted configuration
//! entry; the command line wins when both are present.
//!
//! Example:
//! ```ignore
//! let config = SchedulerConfig::builder()
//!     .workers(WorkerSpec::Auto)
//!     .tests_per_worker(WorkerSpec::Fixed(4))
//!     .continue_on_collection_errors(false)
//!     .build();
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;

use crate::errors::SchedulerError;

/// Fallback for `tests_per_worker = "auto"`, before the even-split cap.
pub const AUTO_TESTS_PER_WORKER: usize = 50;

/// A `workers`/`tests_per_worker` setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerSpec {
    /// The literal `"auto"`.
    Auto,
    Fixed(usize),
}

impl WorkerSpec {
    /// Parses a raw option value. `option` names the setting in the error.
    pub fn parse(value: &str, option: &'static str) -> Result<Self, SchedulerError> {
        let value = value.trim();
        if value == "auto" {
            return Ok(WorkerSpec::Auto);
        }
        value
            .parse()
            .map(WorkerSpec::Fixed)
            .map_err(|_| SchedulerError::InvalidWorkerOption { option })
    }

    /// Resolves the setting from its two sources; the command line takes
    /// precedence over the persisted configuration entry.
    pub fn from_sources(
        cli: Option<&str>,
        file: Option<&str>,
        option: &'static str,
    ) -> Result<Option<Self>, SchedulerError> {
        cli.or(file).map(|value| Self::parse(value, option)).transpose()
    }
}

/// How worker processes are launched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// Re-execute the current binary with the broker endpoint in its
    /// environment.
    #[default]
    Process,
    /// Run the worker entry on threads of the controlling process. For
    /// single-binary embeddings where re-execution is not available; true
    /// process parallelism is forfeited.
    Thread,
}

/// Decides whether a platform must fall back to a single worker.
///
/// Some platforms make process fan-out unsafe or too expensive to be worth
/// it; this is a usability fallback, not a hard limit, so it is a
/// replaceable hook rather than a hardcoded platform check. The default
/// policy forces one worker on Windows.
#[derive(Clone)]
pub struct PlatformPolicy {
    force_single: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl PlatformPolicy {
    pub fn new(force_single: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            force_single: Arc::new(force_single),
        }
    }

    /// Never forces a fallback.
    pub fn permissive() -> Self {
        Self::new(|_| false)
    }

    /// Whether fan-out must collapse to one worker on `os` (a value of
    /// `std::env::consts::OS`).
    pub fn forces_single_worker(&self, os: &str) -> bool {
        (self.force_single)(os)
    }
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self::new(|os| os == "windows")
    }
}

impl fmt::Debug for PlatformPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlatformPolicy(..)")
    }
}

/// Configuration consumed by [`crate::scheduler::ParallelScheduler`].
#[derive(Clone, Debug, Default)]
pub struct SchedulerConfig {
    pub workers: Option<WorkerSpec>,
    pub tests_per_worker: Option<WorkerSpec>,
    /// Keep scheduling even when the collection phase reported failures.
    pub continue_on_collection_errors: bool,
    /// Report success immediately without executing anything.
    pub collect_only: bool,
    pub launch: LaunchMode,
    pub platform_policy: PlatformPolicy,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Builds a configuration from raw option values, applying the
    /// command-line-over-file precedence.
    pub fn from_options(
        workers_cli: Option<&str>,
        workers_file: Option<&str>,
        tests_per_worker_cli: Option<&str>,
        tests_per_worker_file: Option<&str>,
    ) -> Result<SchedulerConfigBuilder, SchedulerError> {
        let mut builder = Self::builder();
        if let Some(spec) = WorkerSpec::from_sources(workers_cli, workers_file, "workers")? {
            builder = builder.workers(spec);
        }
        if let Some(spec) = WorkerSpec::from_sources(
            tests_per_worker_cli,
            tests_per_worker_file,
            "tests_per_worker",
        )? {
            builder = builder.tests_per_worker(spec);
        }
        Ok(builder)
    }

    /// Worker-process count, before the platform policy is applied.
    pub(crate) fn resolve_workers(&self) -> usize {
        match self.workers {
            None => 1,
            Some(WorkerSpec::Fixed(n)) => n.max(1),
            Some(WorkerSpec::Auto) => thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }

    /// Threads per worker, capped at the even split of `total_items` so no
    /// thread is guaranteed idle.
    pub(crate) fn resolve_tests_per_worker(&self, total_items: usize, workers: usize) -> usize {
        let evenly_divided = total_items.div_ceil(workers.max(1));
        match self.tests_per_worker {
            None => 1,
            Some(WorkerSpec::Auto) => AUTO_TESTS_PER_WORKER.min(evenly_divided),
            Some(WorkerSpec::Fixed(n)) => n.min(evenly_divided),
        }
    }
}

/// Builder for [`SchedulerConfig`] with method chaining.
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn workers(mut self, spec: WorkerSpec) -> Self {
        self.config.workers = Some(spec);
        self
    }

    pub fn tests_per_worker(mut self, spec: WorkerSpec) -> Self {
        self.config.tests_per_worker = Some(spec);
        self
    }

    pub fn continue_on_collection_errors(mut self, tolerate: bool) -> Self {
        self.config.continue_on_collection_errors = tolerate;
        self
    }

    pub fn collect_only(mut self, collect_only: bool) -> Self {
        self.config.collect_only = collect_only;
        self
    }

    pub fn launch(mut self, launch: LaunchMode) -> Self {
        self.config.launch = launch;
        self
    }

    pub fn platform_policy(mut self, policy: PlatformPolicy) -> Self {
        self.config.platform_policy = policy;
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}
