//! Thread isolation of the reserved environment key.

use parallel_harness::{EnvError, ThreadLocalEnviron, RESERVED_KEY};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn reserved_key_never_leaks_between_threads() {
    // Every thread sets a unique value, sleeps so its siblings overwrite
    // theirs in the meantime, then re-reads its own.
    let thread_count = 8;
    let barrier = Arc::new(Barrier::new(thread_count));

    let handles: Vec<_> = (0..thread_count)
        .map(|i| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                let env = ThreadLocalEnviron::new();
                let value = format!("suite::test_{i} (call)");
                barrier.wait();
                env.set(RESERVED_KEY, &value);
                thread::sleep(Duration::from_millis(50));
                assert_eq!(
                    env.get(RESERVED_KEY).unwrap(),
                    value,
                    "thread {i} observed another thread's reserved value"
                );
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn reserved_key_read_fails_until_set() {
    thread::spawn(|| {
        let env = ThreadLocalEnviron::new();
        assert_eq!(
            env.get(RESERVED_KEY),
            Err(EnvError::KeyNotSet(RESERVED_KEY.to_string()))
        );
    })
    .join()
    .unwrap();
}

#[test]
fn ordinary_keys_are_process_wide() {
    let env = ThreadLocalEnviron::new();
    env.set("PARALLEL_HARNESS_TEST_SHARED", "shared-value");

    // Visible from any thread, unlike the reserved key.
    thread::spawn(move || {
        assert_eq!(
            env.get("PARALLEL_HARNESS_TEST_SHARED").unwrap(),
            "shared-value"
        );
    })
    .join()
    .unwrap();

    assert!(env.delete("PARALLEL_HARNESS_TEST_SHARED").is_ok());
    assert!(env.delete("PARALLEL_HARNESS_TEST_SHARED").is_err());
}

#[test]
fn snapshot_carries_the_reserved_value_of_its_thread() {
    thread::spawn(|| {
        let env = ThreadLocalEnviron::new();
        env.set(RESERVED_KEY, "suite::snapshot_test");
        env.set("PARALLEL_HARNESS_TEST_SNAP", "kept");

        let snapshot = env.snapshot();
        assert_eq!(snapshot.get(RESERVED_KEY), Some("suite::snapshot_test"));
        assert_eq!(snapshot.get("PARALLEL_HARNESS_TEST_SNAP"), Some("kept"));

        // Mutating after the fact does not touch the snapshot.
        env.set("PARALLEL_HARNESS_TEST_SNAP", "changed");
        assert_eq!(snapshot.get("PARALLEL_HARNESS_TEST_SNAP"), Some("kept"));
        let _ = env.delete("PARALLEL_HARNESS_TEST_SNAP");
    })
    .join()
    .unwrap();
}
