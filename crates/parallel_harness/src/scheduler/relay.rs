//! src/scheduler/relay.rs
//!
//! The result relay: one consumer thread in the controlling process that
//! replays worker-process outcomes through the reporting hook.
//!
//! Downstream report generators expect the hook to fire once per test, in
//! one process. Workers therefore never call the hook themselves; they
//! serialize each report onto the responses queue and this consumer
//! reconstitutes and replays it. The scheduler enqueues the quit event only
//! after every worker process has been joined, so all in-flight reports are
//! already queued ahead of it.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::queue::SharedQueue;
use crate::report::ResultEvent;
use crate::session::ReportHook;

pub(crate) struct ResultRelay {
    handle: Option<JoinHandle<()>>,
    queue: SharedQueue<ResultEvent>,
}

impl ResultRelay {
    /// Starts the consumer thread. The consumer takes its own connection to
    /// the queue; `queue` itself is retained for the shutdown signal.
    pub(crate) fn start(
        queue: SharedQueue<ResultEvent>,
        hook: Arc<dyn ReportHook>,
    ) -> Result<Self> {
        let consumer_queue = queue.clone();
        let handle = thread::Builder::new()
            .name("harness-relay".to_string())
            .spawn(move || consume(consumer_queue, hook))
            .context("failed to spawn the relay consumer thread")?;
        Ok(Self {
            handle: Some(handle),
            queue,
        })
    }

    /// Enqueues the quit event and blocks until the consumer exits.
    pub(crate) fn stop(mut self) -> Result<()> {
        self.queue.put(ResultEvent::Quit)?;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("relay consumer thread panicked");
            }
        }
        Ok(())
    }
}

fn consume(queue: SharedQueue<ResultEvent>, hook: Arc<dyn ReportHook>) {
    loop {
        let event = match queue.get() {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "relay consumer lost the responses queue");
                break;
            }
        };
        let quit = matches!(event, ResultEvent::Quit);
        if let ResultEvent::TestReport(report) = event {
            // A hook failure must not kill the relay; remaining reports
            // would be lost.
            if panic::catch_unwind(AssertUnwindSafe(|| hook.report(&report))).is_err() {
                tracing::warn!(item = %report.item_id, "report hook panicked during replay");
            }
        }
        if let Err(err) = queue.task_done() {
            tracing::debug!(error = %err, "responses queue acknowledgement failed");
        }
        if quit {
            break;
        }
    }
}
