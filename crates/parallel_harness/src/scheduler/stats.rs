//! src/scheduler/stats.rs
//!
//! Outcome tallies shared across whichever threads record reports.
//!
//! Reports arrive from the relay consumer, from in-process worker threads,
//! or from serial execution on the controlling thread; the tallies sit on
//! [`SafeCounter`]s so no update is lost regardless of who records it.

use std::sync::Arc;

use crate::counter::SafeCounter;
use crate::report::{Outcome, TestReport};
use crate::session::ReportHook;

/// Live outcome tallies for one run.
#[derive(Clone)]
pub struct RunStats {
    passed: SafeCounter,
    failed: SafeCounter,
    skipped: SafeCounter,
    errored: SafeCounter,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            passed: SafeCounter::new(0),
            failed: SafeCounter::new(0),
            skipped: SafeCounter::new(0),
            errored: SafeCounter::new(0),
        }
    }

    pub(crate) fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Passed => &self.passed,
            Outcome::Failed => &self.failed,
            Outcome::Skipped => &self.skipped,
            Outcome::Errored => &self.errored,
        };
        if let Err(err) = counter.increment(1) {
            tracing::warn!(error = %err, "failed to record an outcome tally");
        }
    }

    pub fn summary(&self) -> RunSummary {
        let read = |counter: &SafeCounter| counter.value().unwrap_or(0).max(0) as usize;
        RunSummary {
            passed: read(&self.passed),
            failed: read(&self.failed),
            skipped: read(&self.skipped),
            errored: read(&self.errored),
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Final outcome counts of a completed run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }

    /// Whether the run as a whole passed: no failed and no errored tests.
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Conventional process exit status for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }
}

/// Hook wrapper that tallies every report before forwarding it.
pub(crate) struct CountingHook {
    inner: Arc<dyn ReportHook>,
    stats: RunStats,
}

impl CountingHook {
    pub(crate) fn new(inner: Arc<dyn ReportHook>, stats: RunStats) -> Self {
        Self { inner, stats }
    }
}

impl ReportHook for CountingHook {
    fn report(&self, report: &TestReport) {
        self.stats.record(report.outcome);
        self.inner.report(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reflects_recorded_outcomes() {
        let stats = RunStats::new();
        stats.record(Outcome::Passed);
        stats.record(Outcome::Passed);
        stats.record(Outcome::Failed);
        stats.record(Outcome::Skipped);

        let summary = stats.summary();
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errored, 0);
        assert_eq!(summary.total(), 4);
        assert!(!summary.succeeded());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn empty_summary_succeeds() {
        let summary = RunSummary::default();
        assert!(summary.succeeded());
        assert_eq!(summary.exit_code(), 0);
    }
}
