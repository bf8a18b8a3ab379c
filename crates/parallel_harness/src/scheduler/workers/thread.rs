//! src/scheduler/workers/thread.rs
//!
//! The thread worker: pull one entry, execute, report, repeat.
//!
//! Workers never die mid-run. A failure escaping the runner (an `Err` or a
//! panic) is captured whole, origin thread and message and backtrace, onto the
//! errors queue and the worker moves on to its next entry; only a stop
//! sentinel ends the loop. Every popped entry is acknowledged exactly once,
//! sentinels included, which is what makes the controller's queue join
//! sound.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::counter::SafeCounter;
use crate::environ::RESERVED_KEY;
use crate::errors::CapturedFailure;
use crate::report::{ResultEvent, TestReport};
use crate::scheduler::queue::{is_empty_error, Entry, SharedQueue};
use crate::session::{ReportHook, TestItem, TestRunner, WorkerContext};

/// How a worker polls the work queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FetchMode {
    /// Block on the shared queue; used when the queue crosses the process
    /// boundary and sentinels are the only wakeup.
    Blocking,
    /// Drain with `get_nowait`; the in-process fallback, where an empty
    /// queue means the run is over.
    NonBlocking,
}

/// Where a worker's reports go.
pub(crate) enum Reporter {
    /// Straight into the hook; single-process mode.
    Direct(Arc<dyn ReportHook>),
    /// Serialized onto the responses queue for the relay to replay.
    Relay(SharedQueue<ResultEvent>),
}

pub(crate) struct ThreadWorker {
    pub(crate) queue: SharedQueue<Entry>,
    pub(crate) errors: SharedQueue<CapturedFailure>,
    pub(crate) reporter: Reporter,
    pub(crate) reported: SafeCounter,
    pub(crate) items: Arc<Vec<TestItem>>,
    pub(crate) runner: Arc<dyn TestRunner>,
    pub(crate) context: Arc<WorkerContext>,
    pub(crate) mode: FetchMode,
}

impl ThreadWorker {
    pub(crate) fn run(self) {
        let thread_name = thread::current()
            .name()
            .unwrap_or("harness-worker")
            .to_string();
        let mut interrupted = false;

        loop {
            let entry = match self.fetch() {
                Some(entry) => entry,
                None => break,
            };
            match entry {
                Entry::Stop => {
                    self.acknowledge();
                    break;
                }
                Entry::Item(index) => {
                    self.process(index, &thread_name, &mut interrupted);
                    self.acknowledge();
                }
            }
        }
    }

    fn fetch(&self) -> Option<Entry> {
        match self.mode {
            FetchMode::Blocking => match self.queue.get() {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "worker lost the work queue");
                    None
                }
            },
            FetchMode::NonBlocking => match self.queue.get_nowait() {
                Ok(entry) => Some(entry),
                Err(err) if is_empty_error(&err) => None,
                Err(err) => {
                    tracing::warn!(error = %err, "worker lost the work queue");
                    None
                }
            },
        }
    }

    fn process(&self, index: usize, thread_name: &str, interrupted: &mut bool) {
        let Some(item) = self.items.get(index) else {
            self.capture(CapturedFailure::new(
                thread_name,
                format!("work index {index} out of range"),
            ));
            return;
        };

        // The stop flag is observed between items, never mid-item. Remaining
        // entries are drained as skips so every index still gets a report
        // and every entry still gets acknowledged.
        if self.context.stop_requested() {
            if !*interrupted {
                self.capture(CapturedFailure::new(thread_name, "session stop requested"));
                *interrupted = true;
            }
            self.emit(TestReport::skipped(&item.id, "session stop requested"));
            return;
        }

        match execute_item(item, self.runner.as_ref(), &self.context, thread_name) {
            ExecOutcome::Report(report) => self.emit(report),
            ExecOutcome::Captured(failure) => self.capture(failure),
        }
    }

    fn emit(&self, report: TestReport) {
        if let Err(err) = self.reported.increment(1) {
            tracing::warn!(error = %err, "failed to bump the reported counter");
        }
        match &self.reporter {
            Reporter::Direct(hook) => hook.report(&report),
            Reporter::Relay(queue) => {
                if let Err(err) = queue.put(ResultEvent::TestReport(report)) {
                    tracing::warn!(error = %err, "failed to relay a test report");
                }
            }
        }
    }

    fn capture(&self, failure: CapturedFailure) {
        if let Err(err) = self.errors.put(failure) {
            tracing::warn!(error = %err, "failed to record a captured failure");
        }
    }

    fn acknowledge(&self) {
        if let Err(err) = self.queue.task_done() {
            tracing::warn!(error = %err, "work queue acknowledgement failed");
        }
    }
}

pub(crate) enum ExecOutcome {
    Report(TestReport),
    Captured(CapturedFailure),
}

/// Runs one item through the opaque runner, converting escaping failures
/// into a serializable capture. The reserved environment key is set to the
/// item's identifier for the duration (overwritten by the thread's next
/// item).
pub(crate) fn execute_item(
    item: &TestItem,
    runner: &dyn TestRunner,
    context: &WorkerContext,
    thread_name: &str,
) -> ExecOutcome {
    context.environ.set(RESERVED_KEY, &item.id);
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| runner.execute(item, context))) {
        Ok(Ok(mut report)) => {
            if report.duration == Duration::ZERO {
                report.duration = started.elapsed();
            }
            ExecOutcome::Report(report)
        }
        Ok(Err(err)) => ExecOutcome::Captured(CapturedFailure::from_error(thread_name, &err)),
        Err(payload) => {
            ExecOutcome::Captured(CapturedFailure::from_panic(thread_name, payload.as_ref()))
        }
    }
}

/// Spawns `count` named worker threads.
pub(crate) fn spawn_thread_workers(
    count: usize,
    mut make: impl FnMut(usize) -> ThreadWorker,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for worker_id in 0..count {
        let worker = make(worker_id);
        let handle = thread::Builder::new()
            .name(format!("harness-worker-{worker_id}"))
            .spawn(move || worker.run())
            .with_context(|| format!("failed to spawn worker thread {worker_id}"))?;
        handles.push(handle);
    }
    Ok(handles)
}

pub(crate) fn join_thread_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            // The worker loop catches runner panics itself; reaching this
            // means the loop machinery panicked.
            tracing::warn!("a worker thread panicked outside test execution");
        }
    }
}
