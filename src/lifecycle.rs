//! The lifecycle controller: start, signal trap, graceful shutdown, stop
//! (spec Section 4.10).
//!
//! Grounded on the teacher's `Connection::connect` setup sequence (bring up
//! background tasks, wait for a readiness handshake), run here as a server
//! lifecycle instead of a client connect, plus the pack's `salvo`
//! `ConnectionInner::shutdown` GOAWAY-then-drain pattern.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, WorkItem};
use crate::error::Code;
use crate::frame;
use crate::registry::RequestRegistry;
use crate::worker::{Handler, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Owns the dispatcher, request registry, and worker pool for one server
/// instance, and drives them through the Created -> Running -> Draining ->
/// Stopped state machine. The transport listener itself, TLS setup, and
/// signal delivery beyond `install_signal_handlers` are the caller's
/// responsibility (spec Section 1: these are external collaborators).
pub struct Lifecycle {
    config: ServerConfig,
    handler: Handler,
    registry: Arc<RequestRegistry>,
    dispatcher: Arc<Dispatcher>,
    work_tx: mpsc::Sender<WorkItem>,
    work_rx: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    worker_pool: Mutex<Option<WorkerPool>>,
    drain_token: Mutex<CancellationToken>,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new(config: ServerConfig, handler: Handler) -> Self {
        let registry = Arc::new(RequestRegistry::new());
        let (work_tx, work_rx) = mpsc::channel(config.queue_capacity);
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), work_tx.clone(), config.max_connections));

        Lifecycle {
            config,
            handler,
            registry,
            dispatcher,
            work_tx,
            work_rx: Mutex::new(Some(work_rx)),
            worker_pool: Mutex::new(None),
            drain_token: Mutex::new(CancellationToken::new()),
            state: Mutex::new(LifecycleState::Created),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().expect("lifecycle state lock")
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// Brings up the worker pool and transitions Created -> Running. The
    /// listener/transport bind itself happens in the caller, which then
    /// feeds transport events into `self.dispatcher()`.
    pub fn start(&self) -> Result<(), crate::error::Error> {
        let mut state = self.state.lock().expect("lifecycle state lock");
        if *state != LifecycleState::Created {
            return Err(Code::H3_INTERNAL_ERROR.with_reason("start called more than once", crate::error::ErrorLevel::Connection));
        }
        let work_rx = self
            .work_rx
            .lock()
            .expect("work_rx lock")
            .take()
            .expect("work_rx already taken");

        let drain_token = CancellationToken::new();
        *self.drain_token.lock().expect("drain token lock") = drain_token.clone();

        let pool = WorkerPool::spawn(
            self.config.worker_count,
            self.work_tx.clone(),
            work_rx,
            self.registry.clone(),
            self.handler.clone(),
            drain_token,
        );
        *self.worker_pool.lock().expect("worker pool lock") = Some(pool);
        *state = LifecycleState::Running;
        debug!("lifecycle: started with {} workers, queue capacity {}", self.config.worker_count, self.config.queue_capacity);
        Ok(())
    }

    /// Spawns a background task that calls [`Self::shutdown`] when the
    /// process receives SIGINT. Requires `self` to already be wrapped in an
    /// `Arc` since the task outlives the caller's stack frame.
    pub fn install_signal_handlers(self: &Arc<Self>, shutdown_timeout: Duration) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("lifecycle: received interrupt signal, shutting down");
                lifecycle.shutdown(shutdown_timeout).await;
            }
        })
    }

    /// No-op if not Running. Sends GOAWAY on every connection, waits for the
    /// work queue to drain (bounded by `timeout`), logs any request still in
    /// the registry, tells every connection to close, then transitions to
    /// Stopped via [`Self::stop`].
    pub async fn shutdown(&self, timeout: Duration) {
        {
            let mut state = self.state.lock().expect("lifecycle state lock");
            if *state != LifecycleState::Running {
                return;
            }
            *state = LifecycleState::Draining;
        }

        for connection in self.dispatcher.all_connections() {
            if let Err(err) = connection.send_goaway(frame::GOAWAY_SENTINEL) {
                warn!("lifecycle: failed to send GOAWAY on connection {}: {err}", connection.id);
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while !self.registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for key in self.registry.in_flight_keys() {
            warn!("lifecycle: drain timeout, request on connection {} stream {} still in flight", key.0, key.1);
        }

        for connection in self.dispatcher.all_connections() {
            connection.transport().close_connection(Code::H3_NO_ERROR, "graceful shutdown");
            connection.mark_closed();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        self.stop(Duration::from_secs(2)).await;
    }

    /// Cancels any queued-but-not-started work, joins every worker (each
    /// bounded by `per_worker_timeout`), and transitions to Stopped.
    pub async fn stop(&self, per_worker_timeout: Duration) {
        self.drain_token.lock().expect("drain token lock").cancel();
        let pool = self.worker_pool.lock().expect("worker pool lock").take();
        if let Some(pool) = pool {
            pool.shutdown().await;
            pool.join(per_worker_timeout).await;
        }
        *self.state.lock().expect("lifecycle state lock") = LifecycleState::Stopped;
        debug!("lifecycle: stopped");
    }
}
