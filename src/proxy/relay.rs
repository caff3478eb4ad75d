//! Session relays between attached clients and the shared target connection
//!
//! Relays live in an indexed registry (id → entry) instead of holding
//! references to each other: a relay owns its client transport and borrows
//! the shared target sink, so teardown is a single map removal. Frames are
//! opaque here; parsing protocol semantics is the correlator's job on the
//! client side, never the relay's.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{BoxedSink, BoxedSource, Frame};

/// Most frames a not-yet-active relay will queue for the target
const EARLY_QUEUE_LIMIT: usize = 256;

pub type RelayId = u64;

struct RelayEntry {
    to_client: mpsc::UnboundedSender<Frame>,
    active: bool,
    queued: Vec<Frame>,
}

#[derive(Default)]
struct Inner {
    next_id: RelayId,
    target: Option<mpsc::UnboundedSender<Frame>>,
    relays: BTreeMap<RelayId, RelayEntry>,
}

/// Registry of all attached client relays, shared between the client
/// acceptor and the debug endpoint connection
///
/// Every event the target emits is broadcast to every active relay; this
/// fan-out is the intended behavior, not a side effect of sharing. There is
/// no per-client filtering and no ordering guarantee between different
/// clients, only within each client's own stream.
#[derive(Default)]
pub struct RelayRegistry {
    inner: Mutex<Inner>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client relay
    ///
    /// Active immediately if the target is already bound; otherwise the
    /// relay stays inactive until the next bind sweep reaches it.
    pub fn register(&self, to_client: mpsc::UnboundedSender<Frame>) -> RelayId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let active = inner.target.is_some();
        inner.relays.insert(
            id,
            RelayEntry {
                to_client,
                active,
                queued: Vec::new(),
            },
        );
        tracing::debug!(relay = id, active, "client relay registered");
        id
    }

    /// Remove a relay. Frames arriving for this id afterward are dropped,
    /// never forwarded.
    pub fn unregister(&self, id: RelayId) {
        if self.inner.lock().relays.remove(&id).is_some() {
            tracing::debug!(relay = id, "client relay unregistered");
        }
    }

    /// Bind the target sink, activating every registered relay in
    /// registration order and flushing frames queued before readiness
    pub fn bind_target(&self, target: mpsc::UnboundedSender<Frame>) {
        let mut inner = self.inner.lock();
        for (id, entry) in inner.relays.iter_mut() {
            entry.active = true;
            for frame in entry.queued.drain(..) {
                if target.send(frame).is_err() {
                    tracing::warn!(relay = *id, "target sink closed while flushing queued frames");
                    break;
                }
            }
        }
        inner.target = Some(target);
    }

    /// Drop the target sink and deactivate every relay
    ///
    /// Queued frames are kept for the next bind, so a reconnect picks up
    /// where the old connection left off.
    pub fn unbind_target(&self) {
        let mut inner = self.inner.lock();
        inner.target = None;
        for entry in inner.relays.values_mut() {
            entry.active = false;
        }
    }

    /// Forward one client frame toward the target, queueing it while the
    /// relay is not yet active
    pub fn forward_from_client(&self, id: RelayId, frame: Frame) {
        let mut inner = self.inner.lock();
        let Inner { target, relays, .. } = &mut *inner;
        let Some(entry) = relays.get_mut(&id) else {
            tracing::warn!(relay = id, "dropping frame from unregistered relay");
            return;
        };
        match (entry.active, target.as_ref()) {
            (true, Some(target)) => {
                if target.send(frame).is_err() {
                    tracing::warn!(relay = id, "target sink closed, dropping client frame");
                }
            }
            _ => {
                if entry.queued.len() >= EARLY_QUEUE_LIMIT {
                    tracing::warn!(relay = id, "early-write queue full, dropping client frame");
                } else {
                    entry.queued.push(frame);
                }
            }
        }
    }

    /// Broadcast one target frame to every active relay
    pub fn broadcast(&self, frame: &str) {
        let inner = self.inner.lock();
        for (id, entry) in inner.relays.iter() {
            if !entry.active {
                continue;
            }
            if entry.to_client.send(frame.to_owned()).is_err() {
                // client task is tearing down; unregister will reap it
                tracing::debug!(relay = *id, "client channel closed during broadcast");
            }
        }
    }

    pub fn is_target_bound(&self) -> bool {
        self.inner.lock().target.is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .relays
            .values()
            .filter(|e| e.active)
            .count()
    }
}

/// Drive one attached client until it disconnects
///
/// Target→client frames arrive through the registry broadcast; client→
/// target frames go through the registry, which queues them until the
/// target is ready. Unregisters the relay on every exit path so no further
/// writes happen on this client's behalf.
pub async fn serve_client(registry: Arc<RelayRegistry>, mut sink: BoxedSink, mut source: BoxedSource) {
    let (to_client, mut broadcasts) = mpsc::unbounded_channel();
    let id = registry.register(to_client);

    loop {
        tokio::select! {
            frame = broadcasts.recv() => match frame {
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = source.next_frame() => match frame {
                Some(Ok(frame)) => registry.forward_from_client(id, frame),
                Some(Err(e)) => {
                    tracing::debug!(relay = id, error = %e, "client transport error");
                    break;
                }
                None => break,
            },
        }
    }

    registry.unregister(id);
    let _ = sink.close().await;
}
