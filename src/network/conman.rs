//! Connection manager
//!
//! A single reactor thread owns the listening socket, the registry of live
//! connections and every socket task. Other threads talk to it only through
//! the [`EventQueue`]; the reactor calls back into the [`PeerServer`] and the
//! [`ConnectionObserver`] from its own thread.

use crate::network::address::{AddressError, EndpointAddress};
use crate::network::config::ConnManConfig;
use crate::network::connection::{Connection, ConnectionState, IoEvent, IoSender};
use crate::network::errors::ErrorCode;
use crate::network::event::{Event, EventQueue, PeerData};
use crate::network::peer::{CloseInfo, ConnectionObserver, PeerServer};
use crate::network::registry::{ConnectionId, ConnectionTable};
use bytes::Bytes;
use futures::FutureExt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Capacity of the channel from socket tasks to the reactor
const IO_CHANNEL_CAPACITY: usize = 1024;

/// Name of the reactor thread
pub const REACTOR_THREAD_NAME: &str = "conman";

/// Connection manager startup errors
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("Cannot start connection manager on {address}: {source}")]
    Bind {
        address: EndpointAddress,
        #[source]
        source: io::Error,
    },
    #[error("Invalid listen address: {0}")]
    Address(#[from] AddressError),
    #[error("Cannot create reactor runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("Cannot spawn reactor thread: {0}")]
    Spawn(#[source] io::Error),
}

impl ConnError {
    /// Reason code of the underlying OS failure, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ConnError::Bind { source, .. }
            | ConnError::Runtime(source)
            | ConnError::Spawn(source) => Some(ErrorCode::from_io(source)),
            ConnError::Address(_) => None,
        }
    }
}

/// Reactor state, readable from [`Event::Inspect`] callbacks
pub struct ReactorState {
    bind_address: EndpointAddress,
    config: ConnManConfig,
    connections: ConnectionTable<ConnectionState>,
    closing: bool,
}

impl ReactorState {
    /// Address the listener is actually bound to
    pub fn bind_address(&self) -> EndpointAddress {
        self.bind_address
    }

    pub fn config(&self) -> &ConnManConfig {
        &self.config
    }

    pub fn is_isolated(&self) -> bool {
        self.config.isolated
    }

    /// Whether shutdown has begun
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id)
    }

    /// Registered connections in slot order
    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> + '_ {
        self.connections.iter().map(|(_, state)| &state.handle)
    }

    /// Unflushed outbound bytes of a connection
    pub fn backlog(&self, id: ConnectionId) -> Option<usize> {
        self.connections.get(id).map(ConnectionState::backlog)
    }

    /// Snapshot of the registry
    pub fn peers(&self) -> Vec<PeerData> {
        self.connections
            .iter()
            .map(|(_, state)| state.peer_data())
            .collect()
    }
}

/// Thread-safe handle to the connection manager
#[derive(Clone)]
pub struct ConnectionManager {
    queue: Arc<EventQueue>,
    bind_address: EndpointAddress,
    reactor: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

impl ConnectionManager {
    /// Bind the listener and start the reactor thread.
    ///
    /// Bind and listen failures are returned, never retried.
    pub fn start(
        config: ConnManConfig,
        peer_server: Arc<dyn PeerServer>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Self, ConnError> {
        let bind_error = |source| ConnError::Bind {
            address: config.bind,
            source,
        };

        let listener = std::net::TcpListener::bind(config.bind.socket_addr()).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let bind_address = EndpointAddress::try_from(listener.local_addr().map_err(bind_error)?)?;
        log::info!("P2P endpoint is {}.", bind_address);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnError::Runtime)?;

        // Register the listener with the reactor's own I/O driver
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).map_err(ConnError::Runtime)?
        };

        let queue = Arc::new(EventQueue::new());
        let (io_tx, io_rx) = mpsc::channel(IO_CHANNEL_CAPACITY);

        let reactor = Reactor {
            state: ReactorState {
                bind_address,
                config,
                connections: ConnectionTable::new(),
                closing: false,
            },
            queue: queue.clone(),
            listener: Some(listener),
            io_tx,
            io_rx,
            peer_server,
            observer,
        };

        let handle = thread::Builder::new()
            .name(REACTOR_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(reactor.run()))
            .map_err(ConnError::Spawn)?;

        Ok(Self {
            queue,
            bind_address,
            reactor: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Address the listener is bound to
    pub fn bind_address(&self) -> EndpointAddress {
        self.bind_address
    }

    /// Whether the reactor still accepts events
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Post a raw event. Returns `false` after shutdown.
    pub fn submit(&self, event: Event) -> bool {
        self.queue.push(event)
    }

    /// Open an outbound connection
    pub fn connect(&self, target: EndpointAddress) -> bool {
        self.submit(Event::Connect(target))
    }

    /// Deliver a registry snapshot to `callback` on the reactor thread
    pub fn get_peers(&self, callback: impl FnOnce(Vec<PeerData>) + Send + 'static) -> bool {
        self.submit(Event::GetPeers(Box::new(callback)))
    }

    /// Registry snapshot; `None` if the manager has already shut down
    pub async fn peers(&self) -> Option<Vec<PeerData>> {
        let (tx, rx) = oneshot::channel();
        if !self.get_peers(move |peers| {
            let _ = tx.send(peers);
        }) {
            return None;
        }
        rx.await.ok()
    }

    /// Run read-only code against the reactor state
    pub fn inspect(&self, callback: impl FnOnce(&ReactorState) + Send + 'static) -> bool {
        self.submit(Event::Inspect(Box::new(callback)))
    }

    /// Run code on the reactor thread
    pub fn defer(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.submit(Event::DeferFunc(Box::new(callback)))
    }

    /// Close the listener and every connection. Repeated calls do nothing.
    pub fn shutdown(&self, reason: ErrorCode) {
        self.submit(Event::Shutdown(reason));
    }

    /// Block until the reactor thread has exited
    pub fn join(&self) {
        let handle = self
            .reactor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Reactor thread panicked");
            }
        }
    }
}

/// The reactor: sole owner of sockets and registry
struct Reactor {
    state: ReactorState,
    queue: Arc<EventQueue>,
    listener: Option<TcpListener>,
    io_tx: IoSender,
    io_rx: mpsc::Receiver<IoEvent>,
    peer_server: Arc<dyn PeerServer>,
    observer: Arc<dyn ConnectionObserver>,
}

impl Reactor {
    async fn run(mut self) {
        log::debug!("Reactor started on {}", self.state.bind_address);

        while !self.state.closing {
            tokio::select! {
                _ = self.queue.notified() => self.on_wakeup(),
                accepted = accept(self.listener.as_ref()) => self.on_accept(accepted),
                Some(event) = self.io_rx.recv() => self.on_io(event),
            }
        }

        log::debug!("Reactor stopped");
    }

    fn on_wakeup(&mut self) {
        for event in self.queue.take() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::GetPeers(callback) => callback(self.state.peers()),
            Event::Connect(target) => self.connect(target),
            Event::Inspect(callback) => callback(&self.state),
            Event::DeferFunc(callback) => callback(),
            Event::StartRead(id) => self.start_read(id),
            Event::Send(id, data) => self.send(id, data),
            Event::Close(id, reason) => self.close_internal(id, reason),
            Event::Shutdown(reason) => self.shutdown(reason),
        }
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!("Accept error: {}", e);
                return;
            }
        };

        if self.state.config.isolated {
            log::debug!("Isolated, dropping inbound connection from {}", addr);
            return;
        }

        let peer = match EndpointAddress::try_from(addr) {
            Ok(peer) => peer,
            Err(e) => {
                log::debug!("Dropping inbound connection: {}", e);
                return;
            }
        };

        let connection = self.insert_connection(peer, true, Some(stream));
        self.peer_server.authenticate(connection);
    }

    fn on_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Connected(id, stream) => self.on_connected(id, stream),
            IoEvent::Data(id, data) => self.on_data(id, data),
            IoEvent::Eof(id) => self.close_internal(id, ErrorCode::EOF),
            IoEvent::Error(id, code) => self.close_internal(id, code),
        }
    }

    /// Register a connection; `stream` is `None` while an outbound connect
    /// is in flight
    fn insert_connection(
        &mut self,
        peer: EndpointAddress,
        inbound: bool,
        stream: Option<TcpStream>,
    ) -> Arc<Connection> {
        let queue = self.queue.clone();
        let io_tx = self.io_tx.clone();
        let listen_port = self.state.bind_address.port;

        let (_, state) = self.state.connections.insert_with(|id| {
            let handle = Arc::new(Connection::new(id, peer, inbound, listen_port, queue));
            match stream {
                Some(stream) => ConnectionState::open(handle, stream, io_tx),
                None => ConnectionState::connecting(handle),
            }
        });

        let connection = state.handle.clone();
        log::debug!(target: "connection", "{} registered", connection);
        connection
    }

    fn connect(&mut self, target: EndpointAddress) {
        if self.state.closing {
            log::debug!("Shutting down, not connecting to {}", target);
            return;
        }
        log::info!(target: "connection", "Connecting to {}", target);

        let socket = match TcpSocket::new_v4() {
            Ok(socket) => socket,
            Err(e) => return self.failed_connect(target, &e),
        };

        // The first poll issues the connect syscall, so immediate failures
        // surface here instead of in the spawned task
        let mut connecting = socket.connect(target.socket_addr()).boxed();
        let waker = futures::task::noop_waker();
        let stream = match connecting.poll_unpin(&mut Context::from_waker(&waker)) {
            Poll::Ready(Err(e)) => return self.failed_connect(target, &e),
            Poll::Ready(Ok(stream)) => Some(stream),
            Poll::Pending => None,
        };

        let pending = stream.is_none();
        let connection = self.insert_connection(target, false, stream);
        let id = connection.id();

        if pending {
            let io_tx = self.io_tx.clone();
            let task = tokio::spawn(async move {
                let event = match connecting.await {
                    Ok(stream) => IoEvent::Connected(id, stream),
                    Err(e) => IoEvent::Error(id, ErrorCode::from_io(&e)),
                };
                let _ = io_tx.send(event).await;
            });
            if let Some(state) = self.state.connections.get_mut(id) {
                state.track(task);
            }
        }

        self.start_read(id);
    }

    fn failed_connect(&self, target: EndpointAddress, err: &io::Error) {
        let code = ErrorCode::from_io(err);
        log::info!(
            target: "connection",
            "Connecting to {} failed: {} ({})",
            target,
            code.name(),
            code.description()
        );
        self.peer_server.on_failed_connect(target, code);
    }

    fn on_connected(&mut self, id: ConnectionId, stream: TcpStream) {
        let Some(state) = self.state.connections.get_mut(id) else {
            return;
        };
        state.attach(stream, self.io_tx.clone());
        if state.read_requested {
            self.start_read(id);
        }
    }

    fn start_read(&mut self, id: ConnectionId) {
        let buffer_size = self.state.config.read_buffer_size;
        let Some(state) = self.state.connections.get_mut(id) else {
            return;
        };

        if state.arm_read(self.io_tx.clone(), buffer_size) {
            let connection = state.handle.clone();
            log::debug!(target: "connection", "{} connected", connection);
            self.observer.on_connected(&connection);
        }
    }

    fn on_data(&mut self, id: ConnectionId, data: Bytes) {
        let Some(state) = self.state.connections.get(id) else {
            return;
        };
        let connection = state.handle.clone();

        if self.state.config.log_communication {
            log::trace!(target: "communication", "{} received {}", connection, hex::encode(&data));
        }
        self.observer.on_message(&connection, &data);
    }

    fn send(&mut self, id: ConnectionId, data: Bytes) {
        let max_buffer = self.state.config.max_buffer;
        let Some(state) = self.state.connections.get(id) else {
            return;
        };

        if self.state.config.log_communication {
            log::trace!(target: "communication", "{} sending {}", state.handle, hex::encode(&data));
        }

        match state.enqueue(data) {
            Some(backlog) if backlog <= max_buffer => {}
            Some(backlog) => {
                log::warn!(
                    target: "connection",
                    "{} write backlog of {} bytes exceeds {}",
                    state.handle,
                    backlog,
                    max_buffer
                );
                self.close_internal(id, ErrorCode::BUFFER_FULL);
            }
            None => self.close_internal(id, ErrorCode::BUFFER_FULL),
        }
    }

    /// Remove, release and report a connection. Runs once per connection.
    fn close_internal(&mut self, id: ConnectionId, reason: ErrorCode) {
        let Some(state) = self.state.connections.remove(id) else {
            return;
        };
        let connection = state.handle.clone();
        connection.mark_closing();
        state.release();

        log::info!(
            target: "connection",
            "{} closed: {} ({})",
            connection,
            reason.name(),
            reason.description()
        );
        self.observer.on_close(&connection, CloseInfo { error: reason });
    }

    fn shutdown(&mut self, reason: ErrorCode) {
        if self.state.closing {
            return;
        }
        self.state.closing = true;
        log::info!("Shutting down connection manager: {}", reason.name());

        let accepted = self.queue.close();
        self.listener = None;
        for id in self.state.connections.ids() {
            self.close_internal(id, reason);
        }

        // Events that slipped in after the last take still run once
        for event in accepted {
            self.handle_event(event);
        }
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
