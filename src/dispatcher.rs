//! The event dispatcher: the engine's single entry point from the
//! transport, routing events to connection/stream state and enqueuing
//! completed requests for the worker pool (spec Section 4.8).
//!
//! Grounded on the teacher's frame-dispatch loop (`match frame { ... }`
//! routing by discriminant), restructured around the spec's transport
//! [`Event`] enum instead of raw HTTP/2 frames, plus the admission-control
//! and queue-overflow handling the teacher never needed.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::{Code, Error};
use crate::registry::{CancellationReason, RequestRegistry};
use crate::response::Response;
use crate::transport::{is_bidirectional, Event, TransportHandle};

/// One unit of work handed from the dispatcher to a worker: a fully
/// received request stream, ready to be parsed and dispatched to the
/// application callback.
pub enum WorkItem {
    Request {
        connection: Arc<Connection>,
        connection_id: u64,
        stream_id: u64,
        body: Vec<u8>,
    },
    Shutdown,
}

pub struct Dispatcher {
    connections: DashMap<u64, Arc<Connection>>,
    registry: Arc<RequestRegistry>,
    work_tx: mpsc::Sender<WorkItem>,
    max_connections: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<RequestRegistry>, work_tx: mpsc::Sender<WorkItem>, max_connections: usize) -> Self {
        Dispatcher {
            connections: DashMap::new(),
            registry,
            work_tx,
            max_connections,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, connection_id: u64) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|entry| entry.clone())
    }

    /// Every currently-registered connection, for broadcasting GOAWAY during
    /// graceful shutdown (spec Section 4.10).
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// `ConnectionEstablished` carries the newly accepted transport handle,
    /// so it's a separate entry point from [`Self::handle_event`] (whose
    /// variants only ever need a `connection_id` already present in the
    /// map).
    pub fn handle_connection_established(&self, connection_id: u64, transport: Arc<dyn TransportHandle>) -> Result<(), Error> {
        if self.connections.len() >= self.max_connections {
            warn!("rejecting connection {connection_id}: max_connections reached");
            transport.close_connection(Code::H3_EXCESSIVE_LOAD, "max_connections reached");
            return Ok(());
        }
        let connection = Arc::new(Connection::new(connection_id, transport));
        connection.mark_established()?;
        self.connections.insert(connection_id, connection);
        Ok(())
    }

    pub fn handle_event(&self, connection_id: u64, event: Event) -> Result<(), Error> {
        match event {
            Event::ConnectionEstablished => {
                unreachable!("ConnectionEstablished is routed through handle_connection_established")
            }
            Event::ConnectionClosed => {
                // Any `WorkItem::Request` already queued holds its own clone
                // of this same `Arc<Connection>`, so marking it closed here
                // is visible to the worker that eventually dequeues it —
                // that's what turns it into a no-op instead of a write
                // against a torn-down connection (spec Section 4.8).
                if let Some((_, connection)) = self.connections.remove(&connection_id) {
                    connection.mark_closed();
                }
                self.registry.remove_connection(connection_id);
                Ok(())
            }
            Event::SendComplete { .. } => Ok(()),
            Event::Receive { stream_id, data } => self.handle_receive(connection_id, stream_id, data, false),
            Event::ReceiveFin { stream_id, data } => self.handle_receive(connection_id, stream_id, data, true),
            Event::StreamReset { stream_id, code } => {
                debug!("connection {connection_id} stream {stream_id} reset by peer ({code})");
                self.cancel(connection_id, stream_id, CancellationReason::Peer);
                Ok(())
            }
            Event::StopSending { stream_id, code } => {
                debug!("connection {connection_id} stream {stream_id} stop-sending from peer ({code})");
                if let Some(connection) = self.connections.get(&connection_id) {
                    connection.transport().stop_sending(stream_id, Code::H3_REQUEST_CANCELLED);
                }
                self.cancel(connection_id, stream_id, CancellationReason::Peer);
                Ok(())
            }
        }
    }

    fn cancel(&self, connection_id: u64, stream_id: u64, reason: CancellationReason) {
        self.registry.mark_cancelled((connection_id, stream_id), reason);
        if let Some(connection) = self.connections.get(&connection_id) {
            connection.stream_mut(stream_id).mark_cancelled();
        }
    }

    fn handle_receive(&self, connection_id: u64, stream_id: u64, data: Bytes, fin: bool) -> Result<(), Error> {
        let Some(connection) = self.connections.get(&connection_id).map(|e| e.clone()) else {
            // The connection was already torn down; a race between
            // ConnectionClosed and a late Receive is a no-op, not an error.
            return Ok(());
        };

        if is_bidirectional(stream_id) {
            self.handle_request_receive(connection, connection_id, stream_id, data, fin)
        } else {
            let (role, consumed) = connection.unidirectional_role(stream_id, &data)?;
            connection.feed_unidirectional(stream_id, role, &data[consumed..])?;
            if fin {
                connection.forget_unidirectional(stream_id);
            }
            Ok(())
        }
    }

    fn handle_request_receive(&self, connection: Arc<Connection>, connection_id: u64, stream_id: u64, data: Bytes, fin: bool) -> Result<(), Error> {
        if !fin {
            connection.stream_mut(stream_id).buffer_data(&data);
            return Ok(());
        }

        let body = connection.stream_mut(stream_id).complete(&data);
        let item = WorkItem::Request {
            connection: connection.clone(),
            connection_id,
            stream_id,
            body,
        };

        match self.work_tx.try_send(item) {
            Ok(()) => {
                connection.stream_mut(stream_id).mark_dispatched();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("connection {connection_id} stream {stream_id}: work queue full, replying 503");
                self.reply_without_worker(&connection, stream_id, Response::plain_text(503, "Service Unavailable"));
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // The worker pool has shut down; nothing left to do with new work.
                Ok(())
            }
        }
    }

    fn reply_without_worker(&self, connection: &Connection, stream_id: u64, response: Response) {
        if !connection.stream_mut(stream_id).ready_to_send() {
            return;
        }
        let handle = connection.stream_mut(stream_id).handle().cloned();
        if let Some(handle) = handle {
            let bytes = crate::response::encode(&response);
            let _ = handle.write(stream_id, Bytes::from(bytes), true);
        }
        connection.stream_mut(stream_id).mark_responded();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SendToken;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeTransport {
        next_uni: AtomicU64,
        writes: std::sync::Mutex<Vec<(u64, Bytes, bool)>>,
        closed: std::sync::Mutex<Option<Code>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                next_uni: AtomicU64::new(2),
                writes: std::sync::Mutex::new(Vec::new()),
                closed: std::sync::Mutex::new(None),
            }
        }
    }

    impl TransportHandle for FakeTransport {
        fn open_uni_stream(&self) -> crate::error::Result<u64> {
            Ok(self.next_uni.fetch_add(4, Ordering::SeqCst))
        }
        fn open_bidi_stream(&self) -> crate::error::Result<u64> {
            Ok(0)
        }
        fn write(&self, stream_id: u64, data: Bytes, fin: bool) -> crate::error::Result<SendToken> {
            self.writes.lock().unwrap().push((stream_id, data, fin));
            Ok(SendToken(0))
        }
        fn reset_stream(&self, _stream_id: u64, _code: Code) {}
        fn stop_sending(&self, _stream_id: u64, _code: Code) {}
        fn close_connection(&self, code: Code, _reason: &str) {
            *self.closed.lock().unwrap() = Some(code);
        }
    }

    fn new_dispatcher(max_connections: usize) -> (Dispatcher, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(4);
        (Dispatcher::new(Arc::new(RequestRegistry::new()), tx, max_connections), rx)
    }

    #[test]
    fn establishing_a_connection_registers_it() {
        let (dispatcher, _rx) = new_dispatcher(10);
        dispatcher.handle_connection_established(1, Arc::new(FakeTransport::new())).unwrap();
        assert_eq!(dispatcher.connection_count(), 1);
    }

    #[test]
    fn admission_control_rejects_beyond_max_connections() {
        let (dispatcher, _rx) = new_dispatcher(1);
        dispatcher.handle_connection_established(1, Arc::new(FakeTransport::new())).unwrap();
        let transport = Arc::new(FakeTransport::new());
        dispatcher.handle_connection_established(2, transport.clone()).unwrap();
        assert_eq!(dispatcher.connection_count(), 1);
        assert_eq!(*transport.closed.lock().unwrap(), Some(Code::H3_EXCESSIVE_LOAD));
    }

    #[test]
    fn connection_closed_removes_it_and_its_registry_entries() {
        let (dispatcher, _rx) = new_dispatcher(10);
        dispatcher.handle_connection_established(1, Arc::new(FakeTransport::new())).unwrap();
        let connection = dispatcher.connection(1).unwrap();
        dispatcher.handle_event(1, Event::ConnectionClosed).unwrap();
        assert_eq!(dispatcher.connection_count(), 0);
        // A `WorkItem::Request` queued before the close holds its own clone
        // of this same connection, so it must observe the closed state too.
        assert_eq!(connection.state(), crate::connection::ConnectionState::Closed);
    }

    #[tokio::test]
    async fn fin_on_a_request_stream_enqueues_a_work_item() {
        let (dispatcher, mut rx) = new_dispatcher(10);
        dispatcher.handle_connection_established(1, Arc::new(FakeTransport::new())).unwrap();
        dispatcher.handle_event(1, Event::Receive { stream_id: 0, data: Bytes::from_static(b"abc") }).unwrap();
        dispatcher.handle_event(1, Event::ReceiveFin { stream_id: 0, data: Bytes::from_static(b"def") }).unwrap();

        let item = rx.try_recv().unwrap();
        match item {
            WorkItem::Request { body, stream_id, .. } => {
                assert_eq!(body, b"abcdef");
                assert_eq!(stream_id, 0);
            }
            WorkItem::Shutdown => panic!("expected a request"),
        }
    }

    #[test]
    fn stream_reset_marks_cancellation() {
        let (dispatcher, _rx) = new_dispatcher(10);
        dispatcher.handle_connection_established(1, Arc::new(FakeTransport::new())).unwrap();
        dispatcher.handle_event(1, Event::StreamReset { stream_id: 0, code: Code::H3_REQUEST_CANCELLED }).unwrap();
        assert!(dispatcher.registry.is_cancelled((1, 0)));
    }

    #[tokio::test]
    async fn queue_overflow_replies_503_without_enqueuing() {
        let (tx, mut rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(Arc::new(RequestRegistry::new()), tx, 10);
        let transport = Arc::new(FakeTransport::new());
        dispatcher.handle_connection_established(1, transport.clone()).unwrap();

        // Fill the queue with one item.
        dispatcher.handle_event(1, Event::ReceiveFin { stream_id: 0, data: Bytes::from_static(b"a") }).unwrap();
        // Bind a handle so the overflow path can reply.
        dispatcher.connection(1).unwrap().stream_mut(4).bind_handle(transport.clone());
        // Second request on the same connection overflows the bounded queue.
        dispatcher.handle_event(1, Event::ReceiveFin { stream_id: 4, data: Bytes::from_static(b"b") }).unwrap();

        assert_eq!(rx.len(), 1);
        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].2);
        let _ = rx.try_recv();
    }
}
