//! One client's outbound channel.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::events::OutboundEvent;
use parley_core::ids::ConnectionId;

use crate::error::SendError;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// A connected client, as seen by the relay.
///
/// Frames are queued on a bounded channel drained by the transport's writer
/// task, so every frame for one connection is delivered in queue order.
pub struct Connection {
    id: ConnectionId,
    /// Display name assigned at open. Never changes.
    identity: String,
    state: AtomicU8,
    tx: mpsc::Sender<Arc<String>>,
    /// Fired on close; in-flight enrichment tasks for this connection stop.
    cancel: CancellationToken,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    pub fn new(identity: impl Into<String>, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(ConnectionId::new(), identity, tx)
    }

    pub fn with_id(id: ConnectionId, identity: impl Into<String>, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            identity: identity.into(),
            state: AtomicU8::new(OPEN),
            tx,
            cancel: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a serialized frame.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::ConnectionLost);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // The writer is gone; the registry will catch up shortly.
                self.begin_close();
                Err(SendError::ConnectionLost)
            }
        }
    }

    /// Serialize and queue an event.
    pub fn send_event(&self, event: &OutboundEvent) -> Result<(), SendError> {
        let json = event.to_json().map_err(|e| SendError::Encode(e.to_string()))?;
        self.send(Arc::new(json))
    }

    /// Stop accepting frames. Used when the transport side has ended but
    /// the registry has not yet dropped the connection.
    pub fn begin_close(&self) {
        let _ = self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Mark closed and cancel everything waiting on this connection.
    pub fn close(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.cancel.cancel();
    }

    /// Token cancelled when the connection closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Total frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
