//! The session: items to run, the opaque runner, and the reporting hook.
//!
//! Collection happens elsewhere; the scheduler receives a fully discovered,
//! immutable item list and never adds to it. The runner and hook are the two
//! narrow seams to the surrounding tooling: `execute` runs one item and
//! `report` records one outcome, and both must tolerate being called from
//! threads the caller did not create.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::environ::ThreadLocalEnviron;
use crate::isolation::{FinalizerRegistry, SetupStack, ThreadScoped};
use crate::report::TestReport;

/// One discovered unit of test work.
///
/// Items are referenced by index inside the scheduler and shipped to worker
/// processes by value, so they carry no live references.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestItem {
    /// Stable identifier the runner resolves back to an executable test.
    pub id: String,
    /// Serial items are withheld from the work queue and executed in the
    /// controlling process.
    #[serde(default)]
    pub serial: bool,
}

impl TestItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: false,
        }
    }

    /// Marks an item as must-run-in-the-controlling-process.
    pub fn serial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: true,
        }
    }
}

/// Executes one test item.
///
/// Must be safe to call concurrently from multiple threads within one
/// process; per-test mutable lifecycle state belongs in the thread-scoped
/// stores of the provided [`WorkerContext`], not in process-wide globals.
///
/// A returned `TestReport` is a normal outcome, including failures and
/// skips. `Err` (or a panic) means the runner machinery itself broke; the
/// scheduler captures it whole and re-raises after the run completes.
pub trait TestRunner: Send + Sync {
    fn execute(&self, item: &TestItem, cx: &WorkerContext) -> Result<TestReport>;
}

/// Records one report per executed test.
///
/// In multi-process mode this is invoked from the single relay consumer
/// thread in the controlling process, not from the thread that executed the
/// test; implementations must not assume otherwise.
pub trait ReportHook: Send + Sync {
    fn report(&self, report: &TestReport);
}

/// Everything the scheduler needs to drive one run.
pub struct Session {
    items: Vec<TestItem>,
    runner: Arc<dyn TestRunner>,
    hook: Arc<dyn ReportHook>,
    collection_errors: usize,
    stop: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        items: Vec<TestItem>,
        runner: Arc<dyn TestRunner>,
        hook: Arc<dyn ReportHook>,
    ) -> Self {
        Self {
            items,
            runner,
            hook,
            collection_errors: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Records how many failures the collection phase produced; a non-zero
    /// count aborts the run unless tolerant continuation is configured.
    pub fn with_collection_errors(mut self, count: usize) -> Self {
        self.collection_errors = count;
        self
    }

    pub fn items(&self) -> &[TestItem] {
        &self.items
    }

    pub fn collection_errors(&self) -> usize {
        self.collection_errors
    }

    pub(crate) fn runner(&self) -> Arc<dyn TestRunner> {
        self.runner.clone()
    }

    pub(crate) fn hook(&self) -> Arc<dyn ReportHook> {
        self.hook.clone()
    }

    pub(crate) fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Requests a cooperative stop: workers observe the flag after the item
    /// currently executing completes, never preemptively.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Per-worker-process capabilities injected into the runner.
///
/// Built once per worker process before it pulls any test; every thread
/// worker in that process shares the same context and sees only its own
/// thread's partition of the scoped state.
pub struct WorkerContext {
    /// Environment overlay; the reserved key resolves per thread.
    pub environ: ThreadLocalEnviron,
    /// Setup/teardown stack state, partitioned by thread.
    pub setup: Arc<ThreadScoped<SetupStack>>,
    /// Fixture finalizer state, partitioned by thread.
    pub finalizers: Arc<ThreadScoped<FinalizerRegistry>>,
    stop: Arc<AtomicBool>,
}

impl WorkerContext {
    pub(crate) fn new(stop: Arc<AtomicBool>) -> Self {
        Self {
            environ: ThreadLocalEnviron::new(),
            setup: Arc::new(ThreadScoped::new()),
            finalizers: Arc::new(ThreadScoped::new()),
            stop,
        }
    }

    /// Signals that the overall run should stop once in-flight items finish.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
