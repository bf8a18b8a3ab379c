//! Test outcome types and the events relayed between processes.
//!
//! Everything in this module crosses the process boundary, so it is fully
//! serializable and carries no live references: a report produced inside a
//! worker process is serialized into a [`ResultEvent`], shipped over the
//! shared responses queue, and reconstituted in the controlling process
//! before being replayed through the reporting hook.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The outcome of one test's execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    /// The test errored outside its own body (fixture setup/teardown).
    Errored,
}

impl Outcome {
    /// Whether this outcome makes the overall run fail.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Errored)
    }
}

/// The structured result of one test's execution.
///
/// Produced by the opaque test runner, recorded exactly once per item by the
/// reporting hook, either directly (single-process mode) or after a relay
/// round-trip (multi-process mode).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    /// Identifier of the executed item.
    pub item_id: String,
    pub outcome: Outcome,
    /// Wall-clock execution time, filled in by the worker.
    #[serde(default)]
    pub duration: Duration,
    /// Failure or skip reason, if any.
    #[serde(default)]
    pub message: Option<String>,
    /// Captured stdout/stderr of the test, if the runner collects it.
    #[serde(default)]
    pub captured_output: Option<String>,
}

impl TestReport {
    pub fn new(item_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            item_id: item_id.into(),
            outcome,
            duration: Duration::ZERO,
            message: None,
            captured_output: None,
        }
    }

    pub fn passed(item_id: impl Into<String>) -> Self {
        Self::new(item_id, Outcome::Passed)
    }

    pub fn failed(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(item_id, Outcome::Failed).with_message(message)
    }

    pub fn skipped(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(item_id, Outcome::Skipped).with_message(message)
    }

    pub fn errored(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(item_id, Outcome::Errored).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.captured_output = Some(output.into());
        self
    }
}

/// One event on the responses queue.
///
/// Workers push `testreport` events as tests finish; the scheduler pushes a
/// single `quit` event once every worker process has been joined, which is
/// the relay consumer's signal that no further reports can arrive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum ResultEvent {
    TestReport(TestReport),
    Quit,
}
