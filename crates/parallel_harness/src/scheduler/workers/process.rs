//! src/scheduler/workers/process.rs
//!
//! Process fan-out: spawning worker processes and the entry point each one
//! runs.
//!
//! A worker process is this same binary re-executed with the broker's
//! address and auth token in its environment. Its `ParallelScheduler::run`
//! call notices the variables, connects back, pulls the run manifest, and
//! drains the shared work queue on its own thread workers instead of
//! scheduling anything itself. The thread launch mode runs the identical
//! entry on threads of the controlling process, for single-binary
//! embeddings (and this crate's own test suite) where re-execution is not
//! available.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::process::{Child, Command};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::thread::{join_thread_workers, spawn_thread_workers, FetchMode, Reporter, ThreadWorker};
use super::REPORTED_COUNTER;
use crate::counter::SafeCounter;
use crate::scheduler::config::LaunchMode;
use crate::scheduler::queue::broker::BrokerEndpoint;
use crate::scheduler::queue::client::{BrokerClient, BrokerCounter, BrokerQueue};
use crate::scheduler::queue::wire::QueueName;
use crate::scheduler::queue::SharedQueue;
use crate::session::{TestRunner, WorkerContext};

pub(crate) const ENV_BROKER_ADDR: &str = "PARALLEL_HARNESS_BROKER";
pub(crate) const ENV_BROKER_TOKEN: &str = "PARALLEL_HARNESS_TOKEN";

/// Broker endpoint from the environment, present only inside spawned worker
/// processes.
pub(crate) fn active_worker_endpoint() -> Result<Option<BrokerEndpoint>> {
    let Ok(addr) = env::var(ENV_BROKER_ADDR) else {
        return Ok(None);
    };
    let addr = addr
        .parse()
        .with_context(|| format!("malformed {ENV_BROKER_ADDR} value: {addr:?}"))?;
    let token = env::var(ENV_BROKER_TOKEN)
        .map_err(|_| anyhow!("{ENV_BROKER_ADDR} is set but {ENV_BROKER_TOKEN} is missing"))?;
    Ok(Some(BrokerEndpoint { addr, token }))
}

/// The body of one worker process: connect, fetch the manifest, drain the
/// queue on `tests_per_worker` thread workers, exit when they all stop.
pub(crate) fn run_worker(
    runner: Arc<dyn TestRunner>,
    stop: Arc<AtomicBool>,
    endpoint: &BrokerEndpoint,
) -> Result<()> {
    let manifest = BrokerClient::connect(endpoint)
        .manifest()
        .context("worker failed to fetch the run manifest")?;
    let items = Arc::new(manifest.items);
    // Installed once, before any test is pulled; all thread workers in this
    // process share it and see only their own thread's partitions.
    let context = Arc::new(WorkerContext::new(stop));

    let handles = spawn_thread_workers(manifest.tests_per_worker, |_| {
        // One connection per thread so blocking gets don't serialize.
        let client = Arc::new(BrokerClient::connect(endpoint));
        ThreadWorker {
            queue: SharedQueue::Broker(BrokerQueue::new(client.clone(), QueueName::Work)),
            errors: SharedQueue::Broker(BrokerQueue::new(client.clone(), QueueName::Errors)),
            reporter: Reporter::Relay(SharedQueue::Broker(BrokerQueue::new(
                client.clone(),
                QueueName::Responses,
            ))),
            reported: SafeCounter::attached(BrokerCounter::new(client, REPORTED_COUNTER)),
            items: items.clone(),
            runner: runner.clone(),
            context: context.clone(),
            mode: FetchMode::Blocking,
        }
    })?;
    join_thread_workers(handles);
    tracing::debug!("worker drained its share of the work queue");
    Ok(())
}

/// `workers` worker processes (or worker threads, in thread launch mode),
/// all draining the same broker-backed queue.
pub(crate) struct ProcessWorkerPool {
    children: Vec<Child>,
    threads: Vec<JoinHandle<()>>,
}

impl ProcessWorkerPool {
    pub(crate) fn spawn(
        launch: LaunchMode,
        workers: usize,
        endpoint: &BrokerEndpoint,
        runner: Arc<dyn TestRunner>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        match launch {
            LaunchMode::Process => Self::spawn_processes(workers, endpoint),
            LaunchMode::Thread => Self::spawn_threads(workers, endpoint, runner, stop),
        }
    }

    fn spawn_processes(workers: usize, endpoint: &BrokerEndpoint) -> Result<Self> {
        let exe = env::current_exe().context("failed to locate the current executable")?;
        let args: Vec<_> = env::args_os().skip(1).collect();
        let mut children = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let child = Command::new(&exe)
                .args(&args)
                .env(ENV_BROKER_ADDR, endpoint.addr.to_string())
                .env(ENV_BROKER_TOKEN, &endpoint.token)
                .spawn()
                .with_context(|| format!("failed to spawn worker process {worker_id}"))?;
            tracing::debug!(worker_id, pid = child.id(), "spawned worker process");
            children.push(child);
        }
        Ok(Self {
            children,
            threads: Vec::new(),
        })
    }

    fn spawn_threads(
        workers: usize,
        endpoint: &BrokerEndpoint,
        runner: Arc<dyn TestRunner>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut threads = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let endpoint = endpoint.clone();
            let runner = runner.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("harness-worker-proc-{worker_id}"))
                .spawn(move || {
                    if let Err(err) = run_worker(runner, stop, &endpoint) {
                        tracing::warn!(worker_id, error = %err, "worker failed");
                    }
                })
                .with_context(|| format!("failed to spawn worker {worker_id}"))?;
            threads.push(handle);
        }
        Ok(Self {
            children: Vec::new(),
            threads,
        })
    }

    /// Blocks until every worker has exited. Worker failures have already
    /// been captured through the errors queue; exit statuses are only worth
    /// a diagnostic.
    pub(crate) fn join(&mut self) {
        for child in &mut self.children {
            match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::warn!(pid = child.id(), %status, "worker process exited abnormally");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(pid = child.id(), error = %err, "failed to wait for worker process");
                }
            }
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("a worker thread panicked");
            }
        }
    }
}
