// Connected device sessions and envelope fan-out
// Each session owns a bounded outbound queue drained by its writer task

use crate::daemon::protocol::{encode_envelope, Envelope};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Frames buffered per session before new ones are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Registry-assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionHandle {
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
}

/// Set of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

/// Removes its session from the registry when dropped
pub struct Registration {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session; the returned receiver is its outbound queue
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> (Registration, mpsc::Receiver<Bytes>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        self.sessions
            .lock()
            .insert(id, SessionHandle { peer, outbound });
        tracing::info!(session_id = %id, %peer, "session registered");

        let registration = Registration {
            id,
            registry: Arc::clone(self),
        };
        (registration, rx)
    }

    fn unregister(&self, id: SessionId) {
        if let Some(handle) = self.sessions.lock().remove(&id) {
            tracing::info!(session_id = %id, peer = %handle.peer, "session unregistered");
        }
    }

    /// Queue an envelope for every session; returns how many accepted it
    ///
    /// A full or closed queue only affects that session.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = Bytes::from(encode_envelope(envelope));

        let targets: Vec<(SessionId, mpsc::Sender<Bytes>)> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, handle)| (*id, handle.outbound.clone()))
            .collect();

        let mut delivered = 0;
        for (id, outbound) in targets {
            match outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(session_id = %id, kind = envelope.kind(), "outbound queue full, dropping frame");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(session_id = %id, kind = envelope.kind(), "session writer gone, dropping frame");
                }
            }
        }

        tracing::debug!(kind = envelope.kind(), delivered, "broadcast");
        delivered
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
