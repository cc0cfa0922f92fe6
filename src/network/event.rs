//! Cross-thread command queue
//!
//! Any thread may push an [`Event`]; only the reactor thread drains the
//! queue. The lock is held for the push or for swapping the whole pending
//! batch out, never while an event runs.

use crate::network::address::EndpointAddress;
use crate::network::conman::ReactorState;
use crate::network::errors::ErrorCode;
use crate::network::registry::ConnectionId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Snapshot of one registered connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerData {
    pub peer: EndpointAddress,
    pub created_at: DateTime<Utc>,
    pub inbound: bool,
    /// `false` while an outbound connect is still in flight
    pub connected: bool,
}

pub type PeersCallback = Box<dyn FnOnce(Vec<PeerData>) + Send>;
pub type InspectCallback = Box<dyn FnOnce(&ReactorState) + Send>;
pub type DeferredCallback = Box<dyn FnOnce() + Send>;

/// Commands executed on the reactor thread
pub enum Event {
    /// Snapshot the registry
    GetPeers(PeersCallback),
    /// Open an outbound connection
    Connect(EndpointAddress),
    /// Run read-only code against reactor state
    Inspect(InspectCallback),
    /// Run arbitrary code on the reactor thread
    DeferFunc(DeferredCallback),
    StartRead(ConnectionId),
    Send(ConnectionId, Bytes),
    Close(ConnectionId, ErrorCode),
    Shutdown(ErrorCode),
}

impl Event {
    /// Get event type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::GetPeers(_) => "GetPeers",
            Event::Connect(_) => "Connect",
            Event::Inspect(_) => "Inspect",
            Event::DeferFunc(_) => "DeferFunc",
            Event::StartRead(_) => "StartRead",
            Event::Send(..) => "Send",
            Event::Close(..) => "Close",
            Event::Shutdown(_) => "Shutdown",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connect(addr) => write!(f, "Connect({})", addr),
            Event::StartRead(id) => write!(f, "StartRead({})", id),
            Event::Send(id, data) => write!(f, "Send({}, {} bytes)", id, data.len()),
            Event::Close(id, code) => write!(f, "Close({}, {})", id, code.name()),
            Event::Shutdown(code) => write!(f, "Shutdown({})", code.name()),
            other => f.write_str(other.type_name()),
        }
    }
}

/// FIFO inbox of the reactor plus its wake signal
#[derive(Default)]
pub struct EventQueue {
    events: Mutex<Vec<Event>>,
    wakeup: Notify,
    closed: AtomicBool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event and wake the reactor.
    ///
    /// Returns `false` if the queue was closed; the event is dropped.
    pub fn push(&self, event: Event) -> bool {
        let rejected = {
            let mut events = self.lock();
            if self.closed.load(Ordering::Acquire) {
                Some(event)
            } else {
                events.push(event);
                None
            }
        };

        if let Some(event) = rejected {
            log::debug!("Dropping {} event, queue closed", event.type_name());
            return false;
        }
        self.wakeup.notify_one();
        true
    }

    /// Swap out every pending event
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    /// Resolves once an event was pushed since the last wake
    pub async fn notified(&self) {
        self.wakeup.notified().await
    }

    /// Refuse further events and hand back the ones already accepted
    pub fn close(&self) -> Vec<Event> {
        let mut events = self.lock();
        self.closed.store(true, Ordering::Release);
        std::mem::take(&mut *events)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::registry::ConnectionTable;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    fn target(port: u16) -> EndpointAddress {
        EndpointAddress::new(Ipv4Addr::new(192, 0, 2, 1), port)
    }

    fn ports(events: Vec<Event>) -> Vec<u16> {
        events
            .into_iter()
            .map(|e| match e {
                Event::Connect(addr) => addr.port,
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_take_is_fifo() {
        let queue = EventQueue::new();
        for port in 1..=3 {
            assert!(queue.push(Event::Connect(target(port))));
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(ports(queue.take()), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.take().is_empty());
    }

    #[test]
    fn test_fifo_across_threads() {
        let queue = Arc::new(EventQueue::new());

        // Each producer finishes before the next starts, fixing the global order
        for port in [10u16, 20, 30] {
            let q = queue.clone();
            std::thread::spawn(move || {
                q.push(Event::Connect(target(port)));
                q.push(Event::Connect(target(port + 1)));
            })
            .join()
            .unwrap();
        }

        assert_eq!(ports(queue.take()), vec![10, 11, 20, 21, 30, 31]);
    }

    #[test]
    fn test_close_returns_accepted_events() {
        let queue = EventQueue::new();
        queue.push(Event::Connect(target(1)));
        queue.push(Event::Connect(target(2)));

        assert_eq!(ports(queue.close()), vec![1, 2]);
        assert!(queue.is_closed());
        assert!(!queue.push(Event::Connect(target(3))));
        assert!(queue.take().is_empty());
        assert!(queue.close().is_empty());
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = Arc::new(EventQueue::new());

        let q = queue.clone();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q.push(Event::DeferFunc(Box::new(|| {})));
        });

        tokio::time::timeout(Duration::from_secs(5), queue.notified())
            .await
            .expect("wake signal");
        producer.join().unwrap();
        assert_eq!(queue.take().len(), 1);
    }

    #[tokio::test]
    async fn test_wake_before_wait_is_not_lost() {
        let queue = EventQueue::new();
        queue.push(Event::Shutdown(ErrorCode::SHUTDOWN));

        tokio::time::timeout(Duration::from_secs(5), queue.notified())
            .await
            .expect("stored permit");
    }

    #[test]
    fn test_debug_format() {
        let mut table = ConnectionTable::new();
        let (id, _) = table.insert_with(|_| ());
        let event = Event::Send(id, Bytes::from_static(b"abc"));
        assert!(format!("{:?}", event).contains("3 bytes"));
        let event = Event::DeferFunc(Box::new(|| {}));
        assert_eq!(format!("{:?}", event), "DeferFunc");
    }
}
