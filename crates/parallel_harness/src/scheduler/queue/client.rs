//! src/scheduler/queue/client.rs
//!
//! Client side of the state broker: one connection per handle, typed
//! queue/counter views on top.
//!
//! The broker boundary is an inter-process channel subject to transient
//! refusal: a worker can race the controller's accept loop, or the
//! listener's backlog can momentarily fill. Connection refusals are
//! therefore retried indefinitely with a short fixed backoff and never
//! surfaced; any error on an established connection is a real fault and
//! propagates.

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, BufReader};
use std::marker::PhantomData;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::broker::BrokerEndpoint;
use super::local::QueueError;
use super::wire::{read_frame, write_frame, QueueName, Request, Response, RunManifest};
use crate::counter::CompareOp;

/// Fixed backoff between connection attempts.
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A lazily-connected client for the state broker.
///
/// The first request dials and authenticates; requests are serialized per
/// client, so handles meant for different threads should each wrap their own
/// client.
pub struct BrokerClient {
    endpoint: BrokerEndpoint,
    conn: Mutex<Option<Connection>>,
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl BrokerClient {
    /// Creates a client; no connection is made until the first request.
    pub fn connect(endpoint: &BrokerEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            conn: Mutex::new(None),
        }
    }

    pub(crate) fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Fetches the run manifest.
    pub fn manifest(&self) -> Result<RunManifest> {
        match self.request(&Request::Manifest)? {
            Response::Manifest { manifest } => Ok(manifest),
            other => bail!("unexpected broker response to manifest request: {other:?}"),
        }
    }

    pub(crate) fn request(&self, request: &Request) -> Result<Response> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.establish()?);
        }
        let conn = guard.as_mut().ok_or_else(|| anyhow!("broker connection missing"))?;

        let exchanged = write_frame(&mut conn.writer, request)
            .and_then(|()| read_frame::<Response>(&mut conn.reader));
        match exchanged {
            Ok(Response::Error { message }) => Err(anyhow!("broker refused request: {message}")),
            Ok(response) => Ok(response),
            Err(err) => {
                // A dead connection is not recoverable mid-request: a
                // blocking get may already have consumed an entry.
                *guard = None;
                Err(err).context("broker connection failed")
            }
        }
    }

    fn establish(&self) -> Result<Connection> {
        let stream = loop {
            match TcpStream::connect(self.endpoint.addr) {
                Ok(stream) => break stream,
                Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    tracing::debug!(addr = %self.endpoint.addr, "broker refused connection, retrying");
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to connect to state broker at {}", self.endpoint.addr)
                    });
                }
            }
        };

        let mut conn = Connection {
            reader: BufReader::new(stream.try_clone().context("failed to clone broker stream")?),
            writer: stream,
        };
        write_frame(
            &mut conn.writer,
            &Request::Hello {
                token: self.endpoint.token.clone(),
            },
        )?;
        match read_frame::<Response>(&mut conn.reader)? {
            Response::Ok => Ok(conn),
            Response::Error { message } => bail!("broker rejected connection: {message}"),
            other => bail!("unexpected broker response to hello: {other:?}"),
        }
    }
}

/// Typed view of one named broker queue.
pub struct BrokerQueue<T> {
    client: Arc<BrokerClient>,
    name: QueueName,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> BrokerQueue<T> {
    pub fn new(client: Arc<BrokerClient>, name: QueueName) -> Self {
        Self {
            client,
            name,
            _marker: PhantomData,
        }
    }

    pub fn put(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_value(value).context("failed to serialize queue entry")?;
        match self.client.request(&Request::Put {
            queue: self.name,
            payload,
        })? {
            Response::Ok => Ok(()),
            other => bail!("unexpected broker response to put: {other:?}"),
        }
    }

    /// Blocks until an entry is available.
    pub fn get(&self) -> Result<T> {
        match self.client.request(&Request::Get { queue: self.name })? {
            Response::Payload { payload } => {
                serde_json::from_value(payload).context("failed to deserialize queue entry")
            }
            other => bail!("unexpected broker response to get: {other:?}"),
        }
    }

    /// Fails with [`QueueError::Empty`] (downcastable) if nothing is queued.
    pub fn get_nowait(&self) -> Result<T> {
        match self.client.request(&Request::GetNowait { queue: self.name })? {
            Response::Payload { payload } => {
                serde_json::from_value(payload).context("failed to deserialize queue entry")
            }
            Response::Empty => Err(QueueError::Empty.into()),
            other => bail!("unexpected broker response to get_nowait: {other:?}"),
        }
    }

    pub fn task_done(&self) -> Result<()> {
        match self.client.request(&Request::TaskDone { queue: self.name })? {
            Response::Ok => Ok(()),
            other => bail!("unexpected broker response to task_done: {other:?}"),
        }
    }

    /// Blocks until every entry has been acknowledged.
    pub fn join(&self) -> Result<()> {
        match self.client.request(&Request::Join { queue: self.name })? {
            Response::Ok => Ok(()),
            other => bail!("unexpected broker response to join: {other:?}"),
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self.client.request(&Request::Len { queue: self.name })? {
            Response::Int { value } => Ok(value.max(0) as usize),
            other => bail!("unexpected broker response to len: {other:?}"),
        }
    }
}

impl<T> Clone for BrokerQueue<T> {
    /// Clones dial their own connection so handles can block independently.
    fn clone(&self) -> Self {
        Self {
            client: Arc::new(BrokerClient::connect(self.client.endpoint())),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

/// Typed view of one named broker counter.
///
/// The authoritative lock lives broker-side; every operation is one request,
/// serialized through that lock.
#[derive(Clone)]
pub struct BrokerCounter {
    client: Arc<BrokerClient>,
    name: String,
}

impl BrokerCounter {
    pub fn new(client: Arc<BrokerClient>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn add(&self, delta: i64) -> Result<i64> {
        match self.client.request(&Request::CounterAdd {
            counter: self.name.clone(),
            delta,
        })? {
            Response::Int { value } => Ok(value),
            other => bail!("unexpected broker response to counter add: {other:?}"),
        }
    }

    pub fn value(&self) -> Result<i64> {
        match self.client.request(&Request::CounterValue {
            counter: self.name.clone(),
        })? {
            Response::Int { value } => Ok(value),
            other => bail!("unexpected broker response to counter read: {other:?}"),
        }
    }

    pub fn compare(&self, op: CompareOp, rhs: i64) -> Result<bool> {
        match self.client.request(&Request::CounterCompare {
            counter: self.name.clone(),
            op,
            rhs,
        })? {
            Response::Bool { value } => Ok(value),
            other => bail!("unexpected broker response to counter compare: {other:?}"),
        }
    }
}
