//! src/scheduler/queue/wire.rs
//!
//! Frame protocol between worker processes and the state broker.
//!
//! One JSON object per line in each direction; a request is always answered
//! with exactly one response on the same connection. Payloads are carried as
//! raw JSON values so the broker can host queues of different entry types
//! without knowing any of them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};

use crate::counter::CompareOp;
use crate::session::TestItem;

/// The named queues the broker hosts for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Item indices plus stop sentinels.
    Work,
    /// Captured failures escaping test execution.
    Errors,
    /// Result events consumed by the relay.
    Responses,
}

/// Everything a worker process needs to start pulling tests, transferred by
/// value at connection time. The controller's copy is authoritative; a
/// worker's own discovery is ignored so nondeterministic collection cannot
/// skew item indices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub items: Vec<TestItem>,
    pub tests_per_worker: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Request {
    /// First frame on every connection; the token must match the broker's.
    Hello { token: String },
    Manifest,
    Put { queue: QueueName, payload: Value },
    /// Blocks broker-side until an entry is available.
    Get { queue: QueueName },
    GetNowait { queue: QueueName },
    TaskDone { queue: QueueName },
    Join { queue: QueueName },
    Len { queue: QueueName },
    CounterAdd { counter: String, delta: i64 },
    CounterValue { counter: String },
    CounterCompare { counter: String, op: CompareOp, rhs: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum Response {
    Ok,
    Manifest { manifest: RunManifest },
    Payload { payload: Value },
    Empty,
    Int { value: i64 },
    Bool { value: bool },
    Error { message: String },
}

pub(crate) fn write_frame<T: Serialize>(writer: &mut impl Write, frame: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

pub(crate) fn read_frame<T: DeserializeOwned>(reader: &mut impl BufRead) -> io::Result<T> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }
    serde_json::from_str(line.trim_end()).map_err(io::Error::from)
}
