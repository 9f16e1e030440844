//! The fixed-size worker pool that pulls completed request streams off the
//! bounded queue, invokes the application callback, and writes the response
//! back (spec Section 4.9).
//!
//! Grounded on the teacher's `spawn_request_sender`/`spawn_response_receiver`
//! channel-loop pattern (`thread::spawn` + blocking recv), translated to
//! `tokio::spawn` tasks, plus the shutdown-sentinel and per-worker
//! cancellation-token design from the spec's design notes (Section 9).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionState;
use crate::dispatcher::WorkItem;
use crate::message;
use crate::registry::RequestRegistry;
use crate::response::{self, Response};

/// The application callback: takes an assembled request and returns
/// (status, headers, body chunks). A panic inside it is treated the same as
/// a checked application failure — both become a 500 reply.
pub type Handler = Arc<dyn Fn(message::Request) -> (u16, Vec<(String, String)>, Vec<Vec<u8>>) + Send + Sync>;

pub struct WorkerPool {
    work_tx: mpsc::Sender<WorkItem>,
    workers: Vec<JoinHandle<()>>,
    count: usize,
}

impl WorkerPool {
    /// Spawns `count` worker tasks reading from `work_rx`. `drain_token` is
    /// cancelled by the lifecycle controller to make idle workers exit
    /// quietly without waiting for a shutdown sentinel to reach them.
    pub fn spawn(
        count: usize,
        work_tx: mpsc::Sender<WorkItem>,
        work_rx: mpsc::Receiver<WorkItem>,
        registry: Arc<RequestRegistry>,
        handler: Handler,
        drain_token: CancellationToken,
    ) -> Self {
        let shared_rx = Arc::new(Mutex::new(work_rx));
        let mut workers = Vec::with_capacity(count);

        for worker_id in 0..count {
            let shared_rx = shared_rx.clone();
            let registry = registry.clone();
            let handler = handler.clone();
            let drain_token = drain_token.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = shared_rx.lock().await;
                        rx.recv().await
                    };
                    match item {
                        None | Some(WorkItem::Shutdown) => {
                            debug!("worker {worker_id} exiting");
                            break;
                        }
                        Some(WorkItem::Request { connection, connection_id, stream_id, body }) => {
                            if drain_token.is_cancelled() {
                                warn!("worker {worker_id}: drain timeout, abandoning stream {stream_id} on connection {connection_id}");
                                registry.remove((connection_id, stream_id));
                                connection.remove_stream(stream_id);
                                continue;
                            }

                            // The connection may have been torn down (Event::ConnectionClosed)
                            // while this request sat in the queue; a queued item targeting it
                            // becomes a no-op rather than invoking the handler or writing to an
                            // orphaned transport (spec Section 4.8).
                            if connection.state() == ConnectionState::Closed {
                                debug!("worker {worker_id}: connection {connection_id} already closed, dropping queued stream {stream_id}");
                                registry.remove((connection_id, stream_id));
                                continue;
                            }

                            let response = run_request(&registry, connection_id, stream_id, body, &handler);

                            let key = (connection_id, stream_id);
                            if registry.is_cancelled(key) {
                                debug!("connection {connection_id} stream {stream_id}: cancelled mid-flight, dropping response");
                                registry.forget_cancellation(key);
                                connection.remove_stream(stream_id);
                                continue;
                            }
                            registry.remove(key);

                            if connection.state() == ConnectionState::Closed {
                                debug!("connection {connection_id} stream {stream_id}: connection closed mid-request, dropping response");
                                connection.remove_stream(stream_id);
                                continue;
                            }

                            let mut stream = connection.stream_mut(stream_id);
                            if stream.ready_to_send() {
                                let encoded = response::encode(&response);
                                if let Some(handle) = stream.handle().cloned() {
                                    if let Err(err) = handle.write(stream_id, Bytes::from(encoded), true) {
                                        warn!("connection {connection_id} stream {stream_id}: write failed: {err}");
                                    }
                                }
                                stream.mark_responded();
                            } else {
                                warn!("connection {connection_id} stream {stream_id}: not ready to send, dropping response");
                            }
                            drop(stream);
                            connection.remove_stream(stream_id);
                        }
                    }
                }
            }));
        }

        WorkerPool { work_tx, workers, count }
    }

    /// Sends one shutdown sentinel per worker so each exits after draining
    /// whatever is ahead of it in the queue.
    pub async fn shutdown(&self) {
        for _ in 0..self.count {
            if self.work_tx.send(WorkItem::Shutdown).await.is_err() {
                break;
            }
        }
    }

    /// Joins every worker, bounding each by `per_worker_timeout`. Workers
    /// that don't finish in time are logged as a drain-timeout rather than
    /// awaited indefinitely (spec Section 4.10: "each join bounded by a 2s
    /// timeout; unjoined workers are raised into with a drain-timeout
    /// error").
    pub async fn join(self, per_worker_timeout: std::time::Duration) {
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            match tokio::time::timeout(per_worker_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => error!("worker {worker_id} panicked: {join_err}"),
                Err(_) => error!("worker {worker_id}: drain timeout, did not exit in time"),
            }
        }
    }
}

fn run_request(
    registry: &RequestRegistry,
    connection_id: u64,
    stream_id: u64,
    body: Vec<u8>,
    handler: &Handler,
) -> Response {
    let request = match message::assemble(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!("connection {connection_id} stream {stream_id}: malformed request: {err}");
            return Response::plain_text(400, "Bad Request");
        }
    };

    registry.insert(
        (connection_id, stream_id),
        crate::registry::RequestInfo {
            connection_id,
            method: request.method.clone(),
            path: request.path.clone(),
            started_at: std::time::Instant::now(),
        },
    );

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (handler)(request)));
    match outcome {
        Ok((status, headers, body)) if (100..=599).contains(&status) => Response::new(status, headers, body),
        Ok((status, _, _)) => {
            warn!("connection {connection_id} stream {stream_id}: application returned out-of-range status {status}");
            Response::plain_text(500, "Internal Server Error")
        }
        Err(_) => {
            error!("connection {connection_id} stream {stream_id}: application callback panicked");
            Response::plain_text(500, "Internal Server Error")
        }
    }
}
