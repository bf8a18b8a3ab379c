//! Thread-scoped views over per-test lifecycle state.
//!
//! A single-threaded runner keeps one setup/teardown stack and one fixture
//! finalizer registry per process. With several tests in flight on different
//! threads of the same worker, that bookkeeping corrupts: one thread tears
//! down another's fixtures. [`ThreadScoped`] re-scopes such state to "one
//! instance per thread per process" while keeping the semantics of the
//! unscoped original.
//!
//! One `ThreadScoped<SetupStack>` and one `ThreadScoped<FinalizerRegistry>`
//! are installed per worker process, before it pulls any test, and handed to
//! the runner through [`crate::session::WorkerContext`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, ThreadId};

type Teardown = Box<dyn FnOnce() + Send>;

/// Partitions one logical instance of `T` by calling thread.
///
/// Each thread lazily gets its own `T::default()`; no thread can observe or
/// mutate another thread's instance. The map lock is held only for the
/// duration of the access closure.
pub struct ThreadScoped<T> {
    slots: Mutex<HashMap<ThreadId, T>>,
}

impl<T: Default> ThreadScoped<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` against the calling thread's instance.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slots = self.slots.lock();
        f(slots.entry(thread::current().id()).or_default())
    }

    /// Number of threads that have touched this instance.
    pub fn partition_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl<T: Default> Default for ThreadScoped<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Nested fixture setup/teardown bookkeeping for one thread.
///
/// Frames are entered as a test's fixtures are set up and torn down in LIFO
/// order when the test finishes.
#[derive(Default)]
pub struct SetupStack {
    frames: Vec<Frame>,
}

struct Frame {
    item_id: String,
    teardowns: Vec<Teardown>,
}

impl SetupStack {
    /// Pushes a frame for the item about to run.
    pub fn enter(&mut self, item_id: &str) {
        self.frames.push(Frame {
            item_id: item_id.to_string(),
            teardowns: Vec::new(),
        });
    }

    /// Registers a teardown against the innermost frame. Without a frame the
    /// teardown is dropped, mirroring a runner registering outside any test.
    pub fn add_teardown(&mut self, teardown: Teardown) {
        if let Some(frame) = self.frames.last_mut() {
            frame.teardowns.push(teardown);
        }
    }

    /// Identifier of the innermost frame, if any.
    pub fn current_item(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.item_id.as_str())
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pops the innermost frame, running its teardowns in reverse
    /// registration order.
    pub fn exit(&mut self) {
        if let Some(frame) = self.frames.pop() {
            for teardown in frame.teardowns.into_iter().rev() {
                teardown();
            }
        }
    }

    /// Unwinds every remaining frame, innermost first.
    pub fn exit_all(&mut self) {
        while !self.frames.is_empty() {
            self.exit();
        }
    }
}

/// Fixture finalizer registration and execution for one thread.
#[derive(Default)]
pub struct FinalizerRegistry {
    finalizers: HashMap<String, Vec<Teardown>>,
}

impl FinalizerRegistry {
    /// Registers a finalizer for `fixture`.
    pub fn register(&mut self, fixture: &str, finalizer: Teardown) {
        self.finalizers
            .entry(fixture.to_string())
            .or_default()
            .push(finalizer);
    }

    pub fn pending(&self, fixture: &str) -> usize {
        self.finalizers.get(fixture).map_or(0, Vec::len)
    }

    /// Runs and removes `fixture`'s finalizers, most recent first.
    pub fn finish(&mut self, fixture: &str) {
        if let Some(finalizers) = self.finalizers.remove(fixture) {
            for finalizer in finalizers.into_iter().rev() {
                finalizer();
            }
        }
    }

    /// Runs every remaining finalizer.
    pub fn finish_all(&mut self) {
        let fixtures: Vec<String> = self.finalizers.keys().cloned().collect();
        for fixture in fixtures {
            self.finish(&fixture);
        }
    }
}
