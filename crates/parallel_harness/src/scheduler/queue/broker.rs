//! src/scheduler/queue/broker.rs
//!
//! The state broker: a loopback TCP service in the controlling process that
//! hosts the run's shared queues and counters.
//!
//! Worker processes have no memory in common with the controller, so every
//! cross-process structure lives here and is reached through
//! [`super::client::BrokerClient`]. Each accepted connection gets its own
//! handler thread; a blocking `get` simply parks that handler on the
//! underlying queue's condvar until an entry arrives. Connections
//! authenticate with a random per-run token before any other request is
//! served.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::local::{JoinQueue, QueueError};
use super::wire::{read_frame, write_frame, QueueName, Request, Response, RunManifest};

/// Address and credentials a client needs to reach the broker.
#[derive(Clone, Debug)]
pub struct BrokerEndpoint {
    pub addr: SocketAddr,
    pub token: String,
}

pub(crate) struct SharedState {
    work: Arc<JoinQueue<Value>>,
    errors: Arc<JoinQueue<Value>>,
    responses: Arc<JoinQueue<Value>>,
    counters: Mutex<HashMap<String, Arc<Mutex<i64>>>>,
    manifest: RunManifest,
    token: String,
}

impl SharedState {
    fn queue(&self, name: QueueName) -> &Arc<JoinQueue<Value>> {
        match name {
            QueueName::Work => &self.work,
            QueueName::Errors => &self.errors,
            QueueName::Responses => &self.responses,
        }
    }

    fn counter(&self, name: &str) -> Arc<Mutex<i64>> {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }
}

/// The broker service. Binding starts the accept loop; dropping (or calling
/// [`StateBroker::shutdown`]) stops it. Handler threads for live
/// connections exit when their client disconnects.
pub struct StateBroker {
    endpoint: BrokerEndpoint,
    accept_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StateBroker {
    /// Binds a loopback listener and starts serving the given manifest.
    pub fn bind(manifest: RunManifest) -> Result<Self> {
        let listener =
            TcpListener::bind(("127.0.0.1", 0)).context("failed to bind state broker listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read broker listener address")?;
        let token = format!("{:032x}", rand::rng().random::<u128>());

        let shared = Arc::new(SharedState {
            work: Arc::new(JoinQueue::new()),
            errors: Arc::new(JoinQueue::new()),
            responses: Arc::new(JoinQueue::new()),
            counters: Mutex::new(HashMap::new()),
            manifest,
            token: token.clone(),
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_handle = {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("harness-broker".to_string())
                .spawn(move || accept_loop(listener, shared, shutdown))
                .context("failed to spawn broker accept thread")?
        };

        tracing::debug!(%addr, "state broker listening");
        Ok(Self {
            endpoint: BrokerEndpoint { addr, token },
            accept_handle: Some(accept_handle),
            shutdown,
        })
    }

    pub fn endpoint(&self) -> BrokerEndpoint {
        self.endpoint.clone()
    }

    /// Stops accepting connections and joins the accept thread.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the accept loop with a throwaway connection.
        let _ = TcpStream::connect(self.endpoint.addr);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StateBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<SharedState>, shutdown: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name("harness-broker-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = serve_connection(stream, &shared) {
                            tracing::debug!(error = %err, "broker connection closed");
                        }
                    });
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "failed to spawn broker handler thread");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "broker accept failed");
            }
        }
    }
}

fn serve_connection(stream: TcpStream, shared: &SharedState) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone().context("failed to clone broker stream")?);
    let mut writer = stream;

    match read_frame::<Request>(&mut reader)? {
        Request::Hello { token } if token == shared.token => {
            write_frame(&mut writer, &Response::Ok)?;
        }
        Request::Hello { .. } => {
            write_frame(
                &mut writer,
                &Response::Error {
                    message: "authentication failed".to_string(),
                },
            )?;
            return Ok(());
        }
        _ => {
            write_frame(
                &mut writer,
                &Response::Error {
                    message: "expected hello".to_string(),
                },
            )?;
            return Ok(());
        }
    }

    loop {
        let request = match read_frame::<Request>(&mut reader) {
            Ok(request) => request,
            // Client hung up; the connection's work is done.
            Err(_) => return Ok(()),
        };
        let response = handle_request(request, shared);
        write_frame(&mut writer, &response)?;
    }
}

fn handle_request(request: Request, shared: &SharedState) -> Response {
    match request {
        Request::Hello { .. } => Response::Error {
            message: "unexpected hello".to_string(),
        },
        Request::Manifest => Response::Manifest {
            manifest: shared.manifest.clone(),
        },
        Request::Put { queue, payload } => {
            shared.queue(queue).put(payload);
            Response::Ok
        }
        Request::Get { queue } => Response::Payload {
            payload: shared.queue(queue).get(),
        },
        Request::GetNowait { queue } => match shared.queue(queue).get_nowait() {
            Ok(payload) => Response::Payload { payload },
            Err(QueueError::Empty) => Response::Empty,
            Err(err) => Response::Error {
                message: err.to_string(),
            },
        },
        Request::TaskDone { queue } => match shared.queue(queue).task_done() {
            Ok(()) => Response::Ok,
            Err(err) => Response::Error {
                message: err.to_string(),
            },
        },
        Request::Join { queue } => {
            shared.queue(queue).join();
            Response::Ok
        }
        Request::Len { queue } => Response::Int {
            value: shared.queue(queue).len() as i64,
        },
        Request::CounterAdd { counter, delta } => {
            let counter = shared.counter(&counter);
            let mut guard = counter.lock();
            *guard += delta;
            Response::Int { value: *guard }
        }
        Request::CounterValue { counter } => Response::Int {
            value: *shared.counter(&counter).lock(),
        },
        Request::CounterCompare { counter, op, rhs } => Response::Bool {
            value: op.evaluate(*shared.counter(&counter).lock(), rhs),
        },
    }
}
