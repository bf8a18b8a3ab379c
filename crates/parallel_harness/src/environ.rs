//! Environment overlay with one thread-local reserved key.
//!
//! Per-test identifiers must not leak between tests running concurrently on
//! different threads of the same process, while ordinary environment
//! configuration stays globally visible as normal process state. This module
//! gives the one reserved key ([`RESERVED_KEY`], the currently executing
//! test identifier) per-thread resolution and leaves every other key as
//! plain process environment.
//!
//! Setting the reserved key also writes it into the real process
//! environment, so worker processes spawned afterwards inherit the parent's
//! last-set value, but sibling threads never observe each other's value.
//! Reads of the reserved key never consult the process environment; only the
//! calling thread's slot counts.
//!
//! Non-reserved keys carry the usual risk profile of global configuration:
//! concurrent writers race at their own responsibility.

use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

/// The one key that resolves per calling thread.
pub const RESERVED_KEY: &str = "PARALLEL_CURRENT_TEST";

thread_local! {
    static CURRENT_TEST: RefCell<Option<String>> = const { RefCell::new(None) };
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// The key is absent; for the reserved key, absent *for this thread*.
    #[error("environment key {0:?} is not set")]
    KeyNotSet(String),
}

/// Handle over the process environment with the reserved-key overlay.
///
/// All handles observe the same process-wide state; the type exists as an
/// explicit capability that is injected into workers through
/// [`crate::session::WorkerContext`] instead of being reached for ambiently.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLocalEnviron;

impl ThreadLocalEnviron {
    pub fn new() -> Self {
        Self
    }

    /// Reads `key`; the reserved key resolves from the calling thread's slot.
    pub fn get(&self, key: &str) -> Result<String, EnvError> {
        if key == RESERVED_KEY {
            return CURRENT_TEST
                .with(|slot| slot.borrow().clone())
                .ok_or_else(|| EnvError::KeyNotSet(key.to_string()));
        }
        std::env::var(key).map_err(|_| EnvError::KeyNotSet(key.to_string()))
    }

    /// Writes `key`. The reserved key is stored thread-locally and mirrored
    /// into the process environment for inheritance by spawned children.
    pub fn set(&self, key: &str, value: &str) {
        if key == RESERVED_KEY {
            CURRENT_TEST.with(|slot| *slot.borrow_mut() = Some(value.to_string()));
        }
        std::env::set_var(key, value);
    }

    /// Deletes `key`; fails if it was not set (for the reserved key: not set
    /// by the calling thread).
    pub fn delete(&self, key: &str) -> Result<(), EnvError> {
        if key == RESERVED_KEY {
            let had = CURRENT_TEST.with(|slot| slot.borrow_mut().take());
            std::env::remove_var(key);
            return match had {
                Some(_) => Ok(()),
                None => Err(EnvError::KeyNotSet(key.to_string())),
            };
        }
        if std::env::var_os(key).is_none() {
            return Err(EnvError::KeyNotSet(key.to_string()));
        }
        std::env::remove_var(key);
        Ok(())
    }

    /// Snapshot of every visible pair: the calling thread's reserved value
    /// (if set) plus all ordinary keys.
    pub fn iter(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(value) = CURRENT_TEST.with(|slot| slot.borrow().clone()) {
            pairs.push((RESERVED_KEY.to_string(), value));
        }
        for (key, value) in std::env::vars() {
            if key != RESERVED_KEY {
                pairs.push((key, value));
            }
        }
        pairs
    }

    /// Number of visible keys for the calling thread.
    pub fn len(&self) -> usize {
        let reserved = CURRENT_TEST.with(|slot| usize::from(slot.borrow().is_some()));
        let shared = std::env::vars_os()
            .filter(|(key, _)| key.as_os_str() != RESERVED_KEY)
            .count();
        reserved + shared
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Independent copy preserving the calling thread's reserved-key value.
    pub fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            current_test: CURRENT_TEST.with(|slot| slot.borrow().clone()),
            vars: std::env::vars()
                .filter(|(key, _)| key != RESERVED_KEY)
                .collect(),
        }
    }
}

/// Frozen copy of the environment as one thread saw it.
#[derive(Clone, Debug)]
pub struct EnvSnapshot {
    current_test: Option<String>,
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == RESERVED_KEY {
            return self.current_test.as_deref();
        }
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len() + usize::from(self.current_test.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
