//! The single connection toward the debug target
//!
//! Owns the one transport to the discovered endpoint; no other component
//! writes to it directly. Client relays reach the target through the shared
//! [`RelayRegistry`], which this connection binds on open and unbinds on
//! close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::common::Result;
use crate::transport::{ws, BoxedSink, BoxedSource};

use super::relay::RelayRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disconnected,
    Ready,
    Closed,
}

/// Connection to the target's debug endpoint
///
/// Reconnecting replaces the previous transport: the registry is rebound
/// and every registered relay re-activates, so clients survive a target
/// restart without reconnecting themselves.
pub struct EndpointConnection {
    registry: Arc<RelayRegistry>,
    state_tx: watch::Sender<EndpointState>,
    generation: Arc<AtomicU64>,
}

impl EndpointConnection {
    pub fn new(registry: Arc<RelayRegistry>) -> Self {
        let (state_tx, _) = watch::channel(EndpointState::Disconnected);
        Self {
            registry,
            state_tx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect to the discovered endpoint and start relaying
    pub async fn connect(&self, url: &str) -> Result<()> {
        let (sink, source) = ws::connect(url).await?;
        tracing::info!(url, "connected to debug endpoint");
        self.attach(sink, source);
        Ok(())
    }

    /// Wire an already-open transport as the target connection
    pub fn attach(&self, mut sink: BoxedSink, mut source: BoxedSource) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (target_tx, mut target_rx) = mpsc::unbounded_channel();

        // writer: drains relay writes into the target transport
        tokio::spawn(async move {
            while let Some(frame) = target_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "target write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader: fans every target frame out to the active relays
        let registry = self.registry.clone();
        let state_tx = self.state_tx.clone();
        let generations = self.generation.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next_frame().await {
                match item {
                    Ok(frame) => registry.broadcast(&frame),
                    Err(e) => {
                        tracing::warn!(error = %e, "target read failed");
                        break;
                    }
                }
            }
            // a stale reader from a replaced connection must not tear down
            // its replacement
            if generations.load(Ordering::SeqCst) == generation {
                tracing::info!("debug endpoint connection closed");
                registry.unbind_target();
                let _ = state_tx.send(EndpointState::Closed);
            }
        });

        self.registry.bind_target(target_tx);
        let _ = self.state_tx.send(EndpointState::Ready);
    }

    /// Watch connect/ready/closed transitions
    pub fn state(&self) -> watch::Receiver<EndpointState> {
        self.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.state_tx.borrow() == EndpointState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pair::pair;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn attach_activates_registered_relays_and_relays_frames() {
        let registry = Arc::new(RelayRegistry::new());
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let relay = registry.register(client_tx);
        registry.forward_from_client(relay, "queued-command".to_string());

        let ((mut target_sink, mut target_source), proxy_side) = pair();
        let connection = EndpointConnection::new(registry.clone());
        connection.attach(proxy_side.0, proxy_side.1);
        assert!(connection.is_ready());

        // the early write was flushed toward the target on activation
        let flushed = timeout(WAIT, target_source.next_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(flushed, "queued-command");

        // target events fan out to the relay
        target_sink.send("an-event".to_string()).await.unwrap();
        let received = timeout(WAIT, client_rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, "an-event");
    }

    #[tokio::test]
    async fn close_deactivates_relays_and_publishes_state() {
        let registry = Arc::new(RelayRegistry::new());
        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        registry.register(client_tx);

        let ((mut target_sink, _target_source), proxy_side) = pair();
        let connection = EndpointConnection::new(registry.clone());
        let mut state = connection.state();
        connection.attach(proxy_side.0, proxy_side.1);

        target_sink.close().await.unwrap();

        timeout(WAIT, async {
            loop {
                state.changed().await.unwrap();
                if *state.borrow_and_update() == EndpointState::Closed {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_target_bound());
    }

    #[tokio::test]
    async fn reconnect_rebinds_existing_relays() {
        let registry = Arc::new(RelayRegistry::new());
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        registry.register(client_tx);

        let connection = EndpointConnection::new(registry.clone());

        let ((mut first_sink, _first_source), first_proxy) = pair();
        connection.attach(first_proxy.0, first_proxy.1);
        first_sink.close().await.unwrap();

        // second target; the stale reader must not unbind it
        let ((mut second_sink, _second_source), second_proxy) = pair();
        connection.attach(second_proxy.0, second_proxy.1);

        second_sink.send("after-restart".to_string()).await.unwrap();
        let received = timeout(WAIT, async {
            loop {
                if let Some(frame) = client_rx.recv().await {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received, "after-restart");
        assert!(connection.is_ready());
    }
}
