//! src/scheduler/runner.rs
//!
//! The orchestrator: resolves worker counts, wires the queue, relay, and
//! worker pool together, and drives a run to completion.
//!
//! Run protocol, in order: abort on collection failures (unless tolerated);
//! short-circuit collection-only runs; resolve `(workers,
//! tests_per_worker)`; enqueue every parallel item index plus exactly
//! `workers × tests_per_worker` stop sentinels; then either drain the queue
//! on in-process threads (one worker) or start the relay, spawn the process
//! pool, join everything, and confirm the queue drained. Failures captured
//! by workers are re-raised once, after all partial results are in.

use anyhow::Result;
use std::sync::Arc;
use std::thread;

use super::config::SchedulerConfig;
use super::queue::broker::StateBroker;
use super::queue::client::{BrokerClient, BrokerCounter, BrokerQueue};
use super::queue::local::JoinQueue;
use super::queue::wire::{QueueName, RunManifest};
use super::queue::{Entry, SharedQueue};
use super::relay::ResultRelay;
use super::stats::{CountingHook, RunStats, RunSummary};
use super::workers::process::{active_worker_endpoint, run_worker, ProcessWorkerPool};
use super::workers::thread::{
    execute_item, join_thread_workers, spawn_thread_workers, ExecOutcome, FetchMode, Reporter,
    ThreadWorker,
};
use super::workers::REPORTED_COUNTER;
use crate::counter::SafeCounter;
use crate::errors::{CapturedFailure, SchedulerError};
use crate::report::TestReport;
use crate::session::{ReportHook, Session, TestItem, TestRunner, WorkerContext};

/// What a call to [`ParallelScheduler::run`] turned out to be.
#[derive(Debug)]
pub enum RunOutcome {
    /// This process scheduled the run; the summary is final.
    Completed(RunSummary),
    /// This process was a spawned worker: it drained its share of the queue
    /// and should simply exit with status 0.
    Worker,
}

impl RunOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Completed(summary) => Some(summary),
            RunOutcome::Worker => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(summary) => summary.exit_code(),
            RunOutcome::Worker => 0,
        }
    }
}

/// Distributes a session's items over worker processes and threads.
pub struct ParallelScheduler {
    config: SchedulerConfig,
}

impl ParallelScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Runs the session to completion.
    ///
    /// Inside a spawned worker process this drains the shared queue and
    /// returns [`RunOutcome::Worker`]; otherwise it schedules the whole run.
    pub fn run(&self, session: &Session) -> Result<RunOutcome> {
        if let Some(endpoint) = active_worker_endpoint()? {
            run_worker(session.runner(), session.stop_handle(), &endpoint)?;
            return Ok(RunOutcome::Worker);
        }

        if session.collection_errors() > 0 && !self.config.continue_on_collection_errors {
            return Err(SchedulerError::CollectionInterrupted {
                count: session.collection_errors(),
            }
            .into());
        }

        if self.config.collect_only {
            return Ok(RunOutcome::Completed(RunSummary::default()));
        }

        let mut workers = self.config.resolve_workers();
        let os = std::env::consts::OS;
        if workers > 1 && self.config.platform_policy.forces_single_worker(os) {
            println!("INFO: parallel-harness forces 1 worker on {os}");
            tracing::info!(os, "platform policy forced a single worker");
            workers = 1;
        }
        let tests_per_worker = self
            .config
            .resolve_tests_per_worker(session.items().len(), workers);

        announce(workers, tests_per_worker);

        let stats = RunStats::new();
        let hook: Arc<dyn ReportHook> = Arc::new(CountingHook::new(session.hook(), stats.clone()));
        let context = Arc::new(WorkerContext::new(session.stop_handle()));
        let items: Arc<Vec<TestItem>> = Arc::new(session.items().to_vec());

        let captured = if workers == 1 {
            self.run_in_process(&items, tests_per_worker, &hook, &stats, &context, session)?
        } else {
            self.run_fan_out(
                &items,
                workers,
                tests_per_worker,
                &hook,
                &stats,
                &context,
                session,
            )?
        };

        if let Some((count, first)) = captured {
            return Err(SchedulerError::WorkerFailures {
                count,
                origin: first.origin.clone(),
                first,
            }
            .into());
        }
        Ok(RunOutcome::Completed(stats.summary()))
    }

    /// Single-worker mode: no process fan-out, no relay; thread workers
    /// drain an in-process queue and report directly.
    fn run_in_process(
        &self,
        items: &Arc<Vec<TestItem>>,
        tests_per_worker: usize,
        hook: &Arc<dyn ReportHook>,
        stats: &RunStats,
        context: &Arc<WorkerContext>,
        session: &Session,
    ) -> Result<Option<(usize, CapturedFailure)>> {
        let queue = Arc::new(JoinQueue::new());
        for (index, item) in items.iter().enumerate() {
            if !item.serial {
                queue.put(Entry::Item(index));
            }
        }
        for _ in 0..tests_per_worker {
            queue.put(Entry::Stop);
        }

        let errors = Arc::new(JoinQueue::new());
        let reported = SafeCounter::new(0);

        let handles = spawn_thread_workers(tests_per_worker, |_| ThreadWorker {
            queue: SharedQueue::Direct(queue.clone()),
            errors: SharedQueue::Direct(errors.clone()),
            reporter: Reporter::Direct(hook.clone()),
            reported: reported.clone(),
            items: items.clone(),
            runner: session.runner(),
            context: context.clone(),
            mode: FetchMode::NonBlocking,
        })?;
        join_thread_workers(handles);

        let errors = SharedQueue::Direct(errors);
        run_serial_items(items, &session.runner(), hook, context, &errors, &reported)?;

        warn_on_unreplayed(&reported, stats);
        drain_captures(&errors)
    }

    /// Multi-worker mode: broker-backed queues, process pool, result relay.
    #[allow(clippy::too_many_arguments)]
    fn run_fan_out(
        &self,
        items: &Arc<Vec<TestItem>>,
        workers: usize,
        tests_per_worker: usize,
        hook: &Arc<dyn ReportHook>,
        stats: &RunStats,
        context: &Arc<WorkerContext>,
        session: &Session,
    ) -> Result<Option<(usize, CapturedFailure)>> {
        let manifest = RunManifest {
            items: items.as_ref().clone(),
            tests_per_worker,
        };
        let mut broker = StateBroker::bind(manifest)?;
        let endpoint = broker.endpoint();
        let client = Arc::new(BrokerClient::connect(&endpoint));

        let work: BrokerQueue<Entry> = BrokerQueue::new(client.clone(), QueueName::Work);
        for (index, item) in items.iter().enumerate() {
            if !item.serial {
                work.put(&Entry::Item(index))?;
            }
        }
        // One sentinel per worker thread across the whole pool; each thread
        // consumes exactly one before stopping.
        for _ in 0..workers * tests_per_worker {
            work.put(&Entry::Stop)?;
        }

        let relay = ResultRelay::start(
            SharedQueue::Broker(BrokerQueue::new(client.clone(), QueueName::Responses)),
            hook.clone(),
        )?;

        let mut pool = ProcessWorkerPool::spawn(
            self.config.launch,
            workers,
            &endpoint,
            session.runner(),
            session.stop_handle(),
        )?;

        // Serial items stay in the controlling process and run here while
        // the workers drain the queue.
        let errors = SharedQueue::Broker(BrokerQueue::new(client.clone(), QueueName::Errors));
        let reported = SafeCounter::attached(BrokerCounter::new(client.clone(), REPORTED_COUNTER));
        run_serial_items(items, &session.runner(), hook, context, &errors, &reported)?;

        pool.join();
        work.join()?;
        relay.stop()?;

        warn_on_unreplayed(&reported, stats);
        let captured = drain_captures(&errors)?;
        broker.shutdown();
        Ok(captured)
    }
}

/// The run-start diagnostic line, with all four noun forms pluralized.
fn announce(workers: usize, tests_per_worker: usize) {
    let (worker_noun, process_noun) = if workers > 1 {
        ("workers", "processes")
    } else {
        ("worker", "process")
    };
    let (test_noun, thread_noun) = if tests_per_worker > 1 {
        ("tests", "threads")
    } else {
        ("test", "thread")
    };
    println!(
        "parallel-harness: {workers} {worker_noun} ({process_noun}), \
         {tests_per_worker} {test_noun} per worker ({thread_noun})"
    );
}

/// Executes the session's serial items on the calling (controlling) thread,
/// with the same capture and stop semantics as a thread worker.
fn run_serial_items(
    items: &Arc<Vec<TestItem>>,
    runner: &Arc<dyn TestRunner>,
    hook: &Arc<dyn ReportHook>,
    context: &Arc<WorkerContext>,
    errors: &SharedQueue<CapturedFailure>,
    reported: &SafeCounter,
) -> Result<()> {
    let thread_name = thread::current().name().unwrap_or("main").to_string();
    let mut interrupted = false;

    for item in items.iter().filter(|item| item.serial) {
        if context.stop_requested() {
            if !interrupted {
                errors.put(CapturedFailure::new(&thread_name, "session stop requested"))?;
                interrupted = true;
            }
            report_counted(hook, reported, TestReport::skipped(&item.id, "session stop requested"));
            continue;
        }
        match execute_item(item, runner.as_ref(), context, &thread_name) {
            ExecOutcome::Report(report) => report_counted(hook, reported, report),
            ExecOutcome::Captured(failure) => errors.put(failure)?,
        }
    }
    Ok(())
}

fn report_counted(hook: &Arc<dyn ReportHook>, reported: &SafeCounter, report: TestReport) {
    if let Err(err) = reported.increment(1) {
        tracing::warn!(error = %err, "failed to bump the reported counter");
    }
    hook.report(&report);
}

/// Drains the error-capture queue; a non-empty queue yields the total count
/// and the first capture.
fn drain_captures(
    errors: &SharedQueue<CapturedFailure>,
) -> Result<Option<(usize, CapturedFailure)>> {
    let count = errors.len()?;
    if count == 0 {
        return Ok(None);
    }
    let first = errors.get()?;
    let _ = errors.task_done();
    Ok(Some((count, first)))
}

/// Diagnostic for reports that were emitted by a worker but never replayed
/// through the hook (e.g. a relay failure).
fn warn_on_unreplayed(reported: &SafeCounter, stats: &RunStats) {
    let announced = reported.value().unwrap_or(-1);
    let replayed = stats.summary().total() as i64;
    if announced >= 0 && announced != replayed {
        tracing::warn!(announced, replayed, "some test reports were not replayed");
    }
}
