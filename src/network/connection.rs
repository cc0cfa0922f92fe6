//! TCP connections
//!
//! [`Connection`] is the shared handle given to higher layers. Its mutating
//! methods only post events; the reactor owns the matching
//! [`ConnectionState`] and is the only code that touches the socket.

use crate::network::address::EndpointAddress;
use crate::network::errors::ErrorCode;
use crate::network::event::{Event, EventQueue, PeerData};
use crate::network::registry::ConnectionId;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared handle to a registered connection
pub struct Connection {
    id: ConnectionId,
    peer: EndpointAddress,
    inbound: bool,
    created_at: DateTime<Utc>,
    listen_port: u16,
    closing: AtomicBool,
    queue: Arc<EventQueue>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer: EndpointAddress,
        inbound: bool,
        listen_port: u16,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            id,
            peer,
            inbound,
            created_at: Utc::now(),
            listen_port,
            closing: AtomicBool::new(false),
            queue,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> EndpointAddress {
        self.peer
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Creation time in unix seconds
    pub fn created_at_timestamp(&self) -> i64 {
        self.created_at.timestamp()
    }

    /// Port our own node listens on
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Begin delivering inbound data. Callable from any thread.
    pub fn start_read(&self) {
        self.queue.push(Event::StartRead(self.id));
    }

    /// Queue bytes for writing. Callable from any thread.
    pub fn send(&self, data: impl Into<Bytes>) {
        self.queue.push(Event::Send(self.id, data.into()));
    }

    /// Close with the given reason. Callable from any thread; idempotent.
    pub fn close(&self, reason: ErrorCode) {
        if self.is_closing() {
            return;
        }
        self.queue.push(Event::Close(self.id, reason));
    }

    /// Returns `true` for the first caller only
    pub(crate) fn mark_closing(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.inbound { "inbound" } else { "outbound" };
        write!(f, "{} ({} {})", self.peer, direction, self.id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("inbound", &self.inbound)
            .field("created_at", &self.created_at)
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Socket notices sent from I/O tasks to the reactor
#[derive(Debug)]
pub(crate) enum IoEvent {
    Connected(ConnectionId, TcpStream),
    Data(ConnectionId, Bytes),
    Eof(ConnectionId),
    Error(ConnectionId, ErrorCode),
}

pub(crate) type IoSender = mpsc::Sender<IoEvent>;

/// Socket side of a connection
pub(crate) enum Stage {
    /// Outbound connect in flight; writes wait in the channel
    Connecting {
        write_rx: mpsc::UnboundedReceiver<Bytes>,
    },
    /// Socket open, not yet reading
    Ready { read_half: OwnedReadHalf },
    Reading,
}

/// Reactor-owned state of a registered connection
pub(crate) struct ConnectionState {
    pub(crate) handle: Arc<Connection>,
    pub(crate) stage: Stage,
    pub(crate) read_requested: bool,
    write_tx: mpsc::UnboundedSender<Bytes>,
    backlog: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionState {
    /// State for an outbound connection still connecting
    pub(crate) fn connecting(handle: Arc<Connection>) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        Self {
            handle,
            stage: Stage::Connecting { write_rx },
            read_requested: false,
            write_tx,
            backlog: Arc::new(AtomicUsize::new(0)),
            tasks: Vec::new(),
        }
    }

    /// State for a connected socket; spawns the writer
    pub(crate) fn open(handle: Arc<Connection>, stream: TcpStream, io_tx: IoSender) -> Self {
        let mut state = Self::connecting(handle);
        state.attach(stream, io_tx);
        state
    }

    /// Hand a connected socket to this connection
    pub(crate) fn attach(&mut self, stream: TcpStream, io_tx: IoSender) {
        let write_rx = match std::mem::replace(&mut self.stage, Stage::Reading) {
            Stage::Connecting { write_rx } => write_rx,
            other => {
                self.stage = other;
                log::warn!("{} already has a socket", self.handle);
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("{} cannot set TCP_NODELAY: {}", self.handle, e);
        }

        let (read_half, write_half) = stream.into_split();
        self.tasks.push(tokio::spawn(write_loop(
            self.handle.id(),
            write_half,
            write_rx,
            self.backlog.clone(),
            io_tx,
        )));
        self.stage = Stage::Ready { read_half };
    }

    /// Arm reading. Returns `true` if the connection just became live.
    pub(crate) fn arm_read(&mut self, io_tx: IoSender, buffer_size: usize) -> bool {
        match std::mem::replace(&mut self.stage, Stage::Reading) {
            Stage::Ready { read_half } => {
                self.tasks.push(tokio::spawn(read_loop(
                    self.handle.id(),
                    read_half,
                    io_tx,
                    buffer_size,
                )));
                true
            }
            connecting @ Stage::Connecting { .. } => {
                self.stage = connecting;
                self.read_requested = true;
                false
            }
            Stage::Reading => false,
        }
    }

    /// Queue bytes; returns the backlog after queueing, or `None` if the
    /// writer is gone
    pub(crate) fn enqueue(&self, data: Bytes) -> Option<usize> {
        let len = data.len();
        let backlog = self.backlog.fetch_add(len, Ordering::AcqRel) + len;
        self.write_tx.send(data).ok().map(|_| backlog)
    }

    pub(crate) fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !matches!(self.stage, Stage::Connecting { .. })
    }

    pub(crate) fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub(crate) fn peer_data(&self) -> PeerData {
        PeerData {
            peer: self.handle.peer(),
            created_at: self.handle.created_at(),
            inbound: self.handle.is_inbound(),
            connected: self.is_connected(),
        }
    }

    /// Abort I/O tasks; dropping their socket halves closes the socket
    pub(crate) fn release(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_loop(id: ConnectionId, mut reader: OwnedReadHalf, io_tx: IoSender, buffer_size: usize) {
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        let event = match reader.read_buf(&mut buf).await {
            Ok(0) => IoEvent::Eof(id),
            Ok(_) => IoEvent::Data(id, buf.split().freeze()),
            Err(e) => IoEvent::Error(id, ErrorCode::from_io(&e)),
        };
        let last = !matches!(event, IoEvent::Data(..));
        if io_tx.send(event).await.is_err() || last {
            break;
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
    backlog: Arc<AtomicUsize>,
    io_tx: IoSender,
) {
    while let Some(data) = write_rx.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            let _ = io_tx.send(IoEvent::Error(id, ErrorCode::from_io(&e))).await;
            return;
        }
        backlog.fetch_sub(data.len(), Ordering::AcqRel);
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::registry::ConnectionTable;

    fn handle(queue: Arc<EventQueue>, inbound: bool) -> Arc<Connection> {
        let mut table = ConnectionTable::new();
        let (id, _) = table.insert_with(|_| ());
        Arc::new(Connection::new(
            id,
            "10.0.0.5:5555".parse().unwrap(),
            inbound,
            9186,
            queue,
        ))
    }

    #[test]
    fn test_metadata() {
        let conn = handle(Arc::new(EventQueue::new()), true);
        assert_eq!(conn.peer().to_string(), "10.0.0.5:5555");
        assert!(conn.is_inbound());
        assert_eq!(conn.listen_port(), 9186);
        assert!(!conn.is_closing());
        assert_eq!(conn.created_at_timestamp(), conn.created_at().timestamp());
        assert!(conn.to_string().starts_with("10.0.0.5:5555 (inbound #0."));
    }

    #[test]
    fn test_methods_post_events() {
        let queue = Arc::new(EventQueue::new());
        let conn = handle(queue.clone(), false);

        conn.start_read();
        conn.send(b"ping".to_vec());
        conn.close(ErrorCode::LOCAL_CLOSE);

        let events = queue.take();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::StartRead(id) if id == conn.id()));
        assert!(matches!(&events[1], Event::Send(id, data) if *id == conn.id() && &data[..] == b"ping"));
        assert!(matches!(events[2], Event::Close(_, ErrorCode::LOCAL_CLOSE)));
    }

    #[test]
    fn test_closing_transitions_once() {
        let queue = Arc::new(EventQueue::new());
        let conn = handle(queue.clone(), false);

        assert!(conn.mark_closing());
        assert!(!conn.mark_closing());
        assert!(conn.is_closing());

        // Closing handles no longer post close requests
        conn.close(ErrorCode::LOCAL_CLOSE);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_connecting_state_defers_read() {
        let conn = handle(Arc::new(EventQueue::new()), false);
        let mut state = ConnectionState::connecting(conn);
        let (io_tx, _io_rx) = mpsc::channel(4);

        assert!(!state.is_connected());
        assert!(!state.arm_read(io_tx, 1024));
        assert!(state.read_requested);
        assert!(!state.peer_data().connected);
    }

    #[test]
    fn test_backlog_counts_queued_bytes() {
        let conn = handle(Arc::new(EventQueue::new()), false);
        let state = ConnectionState::connecting(conn);

        assert_eq!(state.enqueue(Bytes::from_static(&[0; 10])), Some(10));
        assert_eq!(state.enqueue(Bytes::from_static(&[0; 5])), Some(15));
        assert_eq!(state.backlog(), 15);
    }
}
