#![allow(dead_code)]

use anyhow::{anyhow, Result};
use parallel_harness::{
    ReportHook, Session, TestItem, TestReport, TestRunner, WorkerContext,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// What the scripted runner does for one item.
#[derive(Clone)]
pub enum Behavior {
    Pass { sleep: Duration },
    Fail(&'static str),
    Skip(&'static str),
    /// An `Err` escaping the runner: a defect, not a test failure.
    Error(&'static str),
    /// A panic escaping the runner.
    Panic(&'static str),
    /// Passes, then requests a cooperative session stop.
    PassThenStop,
}

/// Runner driven by a per-item behavior table; unknown items pass
/// immediately. Records which thread executed each item.
pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    pub executions: Mutex<Vec<(String, ThreadId)>>,
}

impl ScriptedRunner {
    pub fn new(behaviors: impl IntoIterator<Item = (&'static str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .into_iter()
                .map(|(id, behavior)| (id.to_string(), behavior))
                .collect(),
            executions: Mutex::new(Vec::new()),
        })
    }

    pub fn all_passing() -> Arc<Self> {
        Self::new([])
    }

    pub fn executed_ids(&self) -> Vec<String> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn execution_threads(&self) -> Vec<ThreadId> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, thread)| *thread)
            .collect()
    }
}

impl TestRunner for ScriptedRunner {
    fn execute(&self, item: &TestItem, cx: &WorkerContext) -> Result<TestReport> {
        self.executions
            .lock()
            .unwrap()
            .push((item.id.clone(), thread::current().id()));

        match self
            .behaviors
            .get(&item.id)
            .cloned()
            .unwrap_or(Behavior::Pass {
                sleep: Duration::ZERO,
            }) {
            Behavior::Pass { sleep } => {
                if !sleep.is_zero() {
                    thread::sleep(sleep);
                }
                Ok(TestReport::passed(&item.id))
            }
            Behavior::Fail(message) => Ok(TestReport::failed(&item.id, message)),
            Behavior::Skip(message) => Ok(TestReport::skipped(&item.id, message)),
            Behavior::Error(message) => Err(anyhow!(message)),
            Behavior::Panic(message) => panic!("{message}"),
            Behavior::PassThenStop => {
                cx.request_stop();
                Ok(TestReport::passed(&item.id))
            }
        }
    }
}

/// Hook that records every replayed report and the thread it arrived on.
pub struct RecordingHook {
    pub reports: Mutex<Vec<(TestReport, ThreadId)>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self, outcome: parallel_harness::Outcome) -> usize {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|(report, _)| report.outcome == outcome)
            .count()
    }

    pub fn total(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn reported_ids(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(report, _)| report.item_id.clone())
            .collect()
    }

    pub fn reporting_threads(&self) -> Vec<ThreadId> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(_, thread)| *thread)
            .collect()
    }
}

impl ReportHook for RecordingHook {
    fn report(&self, report: &TestReport) {
        self.reports
            .lock()
            .unwrap()
            .push((report.clone(), thread::current().id()));
    }
}

pub fn items(ids: &[&str]) -> Vec<TestItem> {
    ids.iter().map(|id| TestItem::new(*id)).collect()
}

pub fn session(
    items: Vec<TestItem>,
    runner: Arc<ScriptedRunner>,
    hook: Arc<RecordingHook>,
) -> Session {
    Session::new(items, runner, hook)
}
