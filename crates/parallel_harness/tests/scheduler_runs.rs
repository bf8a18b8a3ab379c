//! End-to-end scheduler runs: count accounting, failure handling, the
//! single-worker and fan-out paths, and the pre-scheduling aborts.
//!
//! Fan-out cases use the thread launch mode so the whole worker entry
//! (broker connection, manifest fetch, queue drain, result relay) is exercised
//! inside one test process.

mod common;

use anyhow::Result;
use common::{items, session, Behavior, RecordingHook, ScriptedRunner};
use parallel_harness::{
    LaunchMode, Outcome, ParallelScheduler, RunOutcome, SchedulerConfig, SchedulerError, Session,
    TestItem, TestReport, TestRunner, WorkerContext, WorkerSpec,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn run(config: SchedulerConfig, session: &Session) -> Result<RunOutcome> {
    ParallelScheduler::new(config).run(session)
}

// ============================================================================
// 1. Outcome accounting
// ============================================================================

#[test]
fn reported_outcomes_always_add_up_to_the_item_count() -> Result<()> {
    // (workers, tests_per_worker); worker counts above 1 fan out.
    let shapes = [(1usize, 1usize), (1, 4), (2, 2), (3, 2)];

    for (workers, tests_per_worker) in shapes {
        let runner = ScriptedRunner::new([
            ("t1", Behavior::Fail("assertion failed")),
            ("t4", Behavior::Skip("not supported here")),
            ("t7", Behavior::Fail("assertion failed")),
        ]);
        let hook = RecordingHook::new();
        let ids: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let session = session(items(&id_refs), runner.clone(), hook.clone());

        let config = SchedulerConfig::builder()
            .workers(WorkerSpec::Fixed(workers))
            .tests_per_worker(WorkerSpec::Fixed(tests_per_worker))
            .launch(LaunchMode::Thread)
            .build();

        let outcome = run(config, &session)?;
        let summary = outcome.summary().expect("controller run yields a summary");

        assert_eq!(
            summary.total(),
            12,
            "{workers}x{tests_per_worker}: passed+failed+skipped+errored must equal items submitted"
        );
        assert_eq!(summary.failed, 2, "{workers}x{tests_per_worker}");
        assert_eq!(summary.skipped, 1, "{workers}x{tests_per_worker}");
        assert_eq!(summary.passed, 9, "{workers}x{tests_per_worker}");
        assert_eq!(summary.exit_code(), 1, "failing runs exit non-zero");

        // Every item is reported exactly once, no matter how the work
        // interleaved.
        let reported: HashSet<String> = hook.reported_ids().into_iter().collect();
        assert_eq!(reported.len(), 12);
        assert_eq!(hook.total(), 12);
    }
    Ok(())
}

#[test]
fn two_workers_four_failing_tests_fail_the_run() -> Result<()> {
    let runner = ScriptedRunner::new([
        ("t0", Behavior::Fail("1 == 2")),
        ("t1", Behavior::Fail("true == false")),
        ("t2", Behavior::Fail("boom")),
        ("t3", Behavior::Fail("boom")),
    ]);
    let hook = RecordingHook::new();
    let session = session(items(&["t0", "t1", "t2", "t3"]), runner, hook.clone());

    let config = SchedulerConfig::builder()
        .workers(WorkerSpec::Fixed(2))
        .launch(LaunchMode::Thread)
        .build();

    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.passed, 0);
    assert!(!summary.succeeded());
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(hook.count(Outcome::Failed), 4);
    Ok(())
}

// ============================================================================
// 2. Thread-level concurrency within one worker
// ============================================================================

/// Runner with a shared fixture whose setup takes 100ms under a lock, then a
/// per-test sleep. Mirrors a fixture-heavy suite where thread concurrency
/// is what makes overlap possible.
struct FixtureRunner {
    events: Arc<Mutex<Vec<String>>>,
    fixture: Arc<Mutex<()>>,
}

impl TestRunner for FixtureRunner {
    fn execute(&self, item: &TestItem, _cx: &WorkerContext) -> Result<TestReport> {
        self.events.lock().unwrap().push(format!("fixture begin {}", item.id));
        {
            let _guard = self.fixture.lock().unwrap();
            thread::sleep(Duration::from_millis(100));
        }
        let sleep = if item.id == "test_0" { 200 } else { 50 };
        thread::sleep(Duration::from_millis(sleep));
        self.events.lock().unwrap().push(format!("test done {}", item.id));
        Ok(TestReport::passed(&item.id))
    }
}

#[test]
fn one_worker_two_threads_overlap_fixture_setup() -> Result<()> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let runner = Arc::new(FixtureRunner {
        events: events.clone(),
        fixture: Arc::new(Mutex::new(())),
    });
    let hook = RecordingHook::new();
    let session = Session::new(items(&["test_0", "test_1"]), runner, hook.clone());

    let config = SchedulerConfig::builder()
        .tests_per_worker(WorkerSpec::Fixed(2))
        .build();

    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.passed, 2);

    // Both fixtures must begin before either test finishes sleeping;
    // that is thread-level concurrency inside the single worker.
    let events = events.lock().unwrap();
    let first_done = events
        .iter()
        .position(|event| event.starts_with("test done"))
        .expect("some test finished");
    let begins_before_any_done = events[..first_done]
        .iter()
        .filter(|event| event.starts_with("fixture begin"))
        .count();
    assert_eq!(
        begins_before_any_done, 2,
        "expected both fixture setups to start before either test completed: {events:?}"
    );
    Ok(())
}

// ============================================================================
// 3. Pre-scheduling aborts
// ============================================================================

#[test]
fn malformed_worker_options_fail_before_anything_runs() {
    let err = SchedulerConfig::from_options(Some("banana"), None, None, None).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidWorkerOption { option: "workers" }
    ));
    assert_eq!(err.to_string(), "workers can only be an integer or \"auto\"");

    let err = SchedulerConfig::from_options(None, None, None, Some("many")).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidWorkerOption {
            option: "tests_per_worker"
        }
    ));
}

#[test]
fn collection_errors_abort_the_run_before_any_test() {
    let runner = ScriptedRunner::all_passing();
    let hook = RecordingHook::new();
    let session =
        session(items(&["t0", "t1"]), runner.clone(), hook.clone()).with_collection_errors(3);

    let err = run(SchedulerConfig::builder().build(), &session).unwrap_err();
    let err = err
        .downcast_ref::<SchedulerError>()
        .expect("typed scheduler error");
    assert!(matches!(
        err,
        SchedulerError::CollectionInterrupted { count: 3 }
    ));
    assert_eq!(err.to_string(), "3 errors during collection");
    assert!(runner.executed_ids().is_empty(), "no test may have executed");
    assert_eq!(hook.total(), 0);
}

#[test]
fn tolerant_continuation_schedules_despite_collection_errors() -> Result<()> {
    let runner = ScriptedRunner::all_passing();
    let hook = RecordingHook::new();
    let session =
        session(items(&["t0", "t1"]), runner, hook.clone()).with_collection_errors(1);

    let config = SchedulerConfig::builder()
        .continue_on_collection_errors(true)
        .build();
    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.passed, 2);
    assert_eq!(hook.total(), 2);
    Ok(())
}

#[test]
fn collect_only_reports_success_without_executing() -> Result<()> {
    let runner = ScriptedRunner::new([
        ("t0", Behavior::Panic("must never run")),
        ("t1", Behavior::Panic("must never run")),
    ]);
    let hook = RecordingHook::new();
    let session = session(items(&["t0", "t1"]), runner.clone(), hook.clone());

    let config = SchedulerConfig::builder().collect_only(true).build();
    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.exit_code(), 0);
    assert!(runner.executed_ids().is_empty());
    assert_eq!(hook.total(), 0);
    Ok(())
}

// ============================================================================
// 4. Captured worker failures
// ============================================================================

#[test]
fn escaping_failures_are_deferred_and_raised_once() {
    let runner = ScriptedRunner::new([
        ("t1", Behavior::Panic("fixture machinery broke")),
        ("t3", Behavior::Error("runner defect")),
    ]);
    let hook = RecordingHook::new();
    let ids = ["t0", "t1", "t2", "t3", "t4", "t5"];
    let session = session(items(&ids), runner.clone(), hook.clone());

    let config = SchedulerConfig::builder()
        .tests_per_worker(WorkerSpec::Fixed(2))
        .build();

    let err = run(config, &session).unwrap_err();
    match err.downcast_ref::<SchedulerError>() {
        Some(SchedulerError::WorkerFailures { count, origin, first }) => {
            assert_eq!(*count, 2, "both escaping failures must be counted");
            assert!(origin.starts_with("harness-worker-"), "origin was {origin:?}");
            assert!(!first.backtrace.is_empty() || !first.message.is_empty());
        }
        other => panic!("expected WorkerFailures, got {other:?}"),
    }

    // Every item executed, and the four well-behaved ones were reported.
    assert_eq!(runner.executed_ids().len(), 6);
    assert_eq!(hook.total(), 4);
    assert_eq!(hook.count(Outcome::Passed), 4);
}

#[test]
fn escaping_failures_cross_the_process_boundary() {
    let runner = ScriptedRunner::new([("t2", Behavior::Panic("exploded in a worker"))]);
    let hook = RecordingHook::new();
    let session = session(items(&["t0", "t1", "t2", "t3"]), runner, hook.clone());

    let config = SchedulerConfig::builder()
        .workers(WorkerSpec::Fixed(2))
        .launch(LaunchMode::Thread)
        .build();

    let err = run(config, &session).unwrap_err();
    match err.downcast_ref::<SchedulerError>() {
        Some(SchedulerError::WorkerFailures { count, first, .. }) => {
            assert_eq!(*count, 1);
            assert!(first.message.contains("exploded in a worker"));
        }
        other => panic!("expected WorkerFailures, got {other:?}"),
    }
    assert_eq!(hook.total(), 3);
}

#[test]
fn zero_captures_mean_success_even_with_failing_tests() -> Result<()> {
    let runner = ScriptedRunner::new([("t0", Behavior::Fail("expected 3, got 4"))]);
    let hook = RecordingHook::new();
    let session = session(items(&["t0", "t1"]), runner, hook);

    // run() itself succeeds; the failure lives in the summary.
    let summary = *run(SchedulerConfig::builder().build(), &session)?
        .summary()
        .expect("summary");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
    Ok(())
}

// ============================================================================
// 5. Cooperative stop
// ============================================================================

#[test]
fn stop_request_is_observed_between_items() {
    let runner = ScriptedRunner::new([("t0", Behavior::PassThenStop)]);
    let hook = RecordingHook::new();
    let session = session(items(&["t0", "t1", "t2", "t3"]), runner.clone(), hook.clone());

    // Single thread so the queue drains in order: t0 runs, then the flag is
    // visible before t1.
    let err = run(SchedulerConfig::builder().build(), &session).unwrap_err();
    match err.downcast_ref::<SchedulerError>() {
        Some(SchedulerError::WorkerFailures { count, first, .. }) => {
            assert_eq!(*count, 1);
            assert!(first.message.contains("session stop requested"));
        }
        other => panic!("expected the interrupt capture, got {other:?}"),
    }

    // t0 completed (never cancelled mid-flight); the rest were drained as
    // skips so the accounting still covers every item.
    assert_eq!(runner.executed_ids(), vec!["t0".to_string()]);
    assert_eq!(hook.count(Outcome::Passed), 1);
    assert_eq!(hook.count(Outcome::Skipped), 3);
    assert_eq!(hook.total(), 4);
}

// ============================================================================
// 6. Serial items and relay threading
// ============================================================================

#[test]
fn serial_items_run_on_the_controlling_thread() -> Result<()> {
    let controlling_thread = thread::current().id();

    let runner = ScriptedRunner::all_passing();
    let hook = RecordingHook::new();
    let mut all_items = items(&["t0", "t1", "t2"]);
    all_items.push(TestItem::serial("serial_0"));
    let session = Session::new(all_items, runner.clone(), hook.clone());

    let config = SchedulerConfig::builder()
        .workers(WorkerSpec::Fixed(2))
        .launch(LaunchMode::Thread)
        .build();

    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.passed, 4);

    let executions = runner.executions.lock().unwrap();
    let serial_thread = executions
        .iter()
        .find(|(id, _)| id == "serial_0")
        .map(|(_, thread)| *thread)
        .expect("serial item executed");
    assert_eq!(serial_thread, controlling_thread);

    for (id, thread) in executions.iter() {
        if id != "serial_0" {
            assert_ne!(
                *thread, controlling_thread,
                "parallel item {id} ran on the controlling thread"
            );
        }
    }
    Ok(())
}

#[test]
fn fanned_out_reports_replay_on_a_single_relay_thread() -> Result<()> {
    let controlling_thread = thread::current().id();

    let runner = ScriptedRunner::all_passing();
    let hook = RecordingHook::new();
    let ids = ["t0", "t1", "t2", "t3", "t4", "t5"];
    let session = session(items(&ids), runner.clone(), hook.clone());

    let config = SchedulerConfig::builder()
        .workers(WorkerSpec::Fixed(2))
        .tests_per_worker(WorkerSpec::Fixed(2))
        .launch(LaunchMode::Thread)
        .build();

    let summary = *run(config, &session)?.summary().expect("summary");
    assert_eq!(summary.passed, 6);

    // Exactly one replay thread, and it is neither the controlling thread
    // nor any thread that executed a test.
    let reporting: HashSet<_> = hook.reporting_threads().into_iter().collect();
    assert_eq!(reporting.len(), 1, "reports must replay on one thread");
    let relay_thread = *reporting.iter().next().expect("relay thread");
    assert_ne!(relay_thread, controlling_thread);
    for executor in runner.execution_threads() {
        assert_ne!(relay_thread, executor);
    }
    Ok(())
}
