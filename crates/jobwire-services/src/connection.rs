//! Connection context — the controller connection the worker currently holds.
//!
//! The transport session is the only writer: it publishes a handle when a
//! connection becomes active and clears it when the connection goes away.
//! The drain loop reads the current handle before every write, so once a
//! disconnect has been observed no further frame is queued on the old
//! connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Process-unique id of one controller connection.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Write side of one controller connection.
///
/// Frames are queued to the connection's writer task, which owns the socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: String,
    frames: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer task drains.
    pub fn new(peer: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (frames, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            frames,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue one encoded frame for the writer task.
    pub fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.frames
            .send(frame)
            .map_err(|_| ConnectionError::Closed(self.id))
    }

    /// True once the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

/// Shared, atomically swappable slot holding the live connection.
#[derive(Clone)]
pub struct ConnectionContext {
    current: Arc<ArcSwapOption<ConnectionHandle>>,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Publish a newly active connection, replacing any previous one.
    pub fn set(&self, handle: Arc<ConnectionHandle>) {
        let id = handle.id();
        if let Some(previous) = self.current.swap(Some(handle)) {
            tracing::debug!(
                previous = previous.id(),
                current = id,
                "connection replaced"
            );
        }
    }

    /// Clear the slot if it still holds connection `id`.
    ///
    /// Returns false when a newer connection has already taken its place.
    pub fn clear(&self, id: ConnectionId) -> bool {
        let previous = self.current.rcu(|current| match current {
            Some(handle) if handle.id() == id => None,
            other => other.clone(),
        });
        previous.is_some_and(|handle| handle.id() == id)
    }

    /// The live connection, if any.
    pub fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.current.load_full()
    }

    pub fn is_connected(&self) -> bool {
        self.current.load().is_some()
    }
}
