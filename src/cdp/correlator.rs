//! Command/response correlation over a shared frame transport

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};
use crate::transport::Frame;

use super::types::{CommandFrame, ErrorBody, EventFrame, EventPattern, InboundFrame};

/// Command identifier source shared by every correlator on one connection
///
/// Ids must stay unique across sibling correlators for as long as any of
/// their commands are pending; a collision would deliver a reply to the
/// wrong caller. Reset only after rejecting all pending commands.
#[derive(Debug, Default)]
pub struct CommandIds(AtomicU64);

impl CommandIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Write side of the connection, rebindable across reconnects
#[derive(Clone, Default)]
pub struct OutboundSink {
    inner: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>,
}

impl OutboundSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.inner.lock() = Some(tx);
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().is_some()
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        match self.inner.lock().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::NotConnected),
        }
    }
}

type EventHandler = Arc<dyn Fn(&EventFrame) + Send + Sync>;

struct EventSubscription {
    pattern: EventPattern,
    handler: EventHandler,
}

struct PendingCommand {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Correlates outgoing commands with replies and dispatches events for one
/// logical protocol domain
///
/// Several correlators may share one transport; a reply finds its owner
/// through the pending-id map, and ids never collide because [`CommandIds`]
/// is shared.
pub struct CommandCorrelator {
    domain: String,
    ids: Arc<CommandIds>,
    sink: OutboundSink,
    timeout: Duration,
    pending: Mutex<HashMap<u64, PendingCommand>>,
    subscriptions: Mutex<Vec<EventSubscription>>,
}

impl CommandCorrelator {
    pub fn new(
        domain: impl Into<String>,
        ids: Arc<CommandIds>,
        sink: OutboundSink,
        timeout: Duration,
    ) -> Self {
        Self {
            domain: domain.into(),
            ids,
            sink,
            timeout,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Send `{id, method, params}` and wait for the matching reply
    ///
    /// The pending entry is claimed exactly once: whichever of the reply
    /// path and the timeout path removes it from the map resolves the
    /// caller. A reply arriving after the timeout claimed the entry is
    /// dropped by [`dispatch`](Self::dispatch) as unmatched.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.ids.next();
        let frame = CommandFrame { id, method, params }.to_json()?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            PendingCommand {
                method: method.to_string(),
                tx,
            },
        );

        if let Err(e) = self.sink.send(frame) {
            self.pending.lock().remove(&id);
            return Err(e);
        }
        tracing::trace!(domain = %self.domain, id, method, "command sent");

        let sleep = tokio::time::sleep(self.timeout);
        tokio::pin!(sleep);
        tokio::select! {
            outcome = &mut rx => outcome.unwrap_or_else(|_| Err(Error::ConnectionClosed)),
            _ = &mut sleep => {
                if self.pending.lock().remove(&id).is_some() {
                    tracing::debug!(domain = %self.domain, id, method, "command timed out");
                    Err(Error::CommandTimeout {
                        method: method.to_string(),
                        secs: self.timeout.as_secs(),
                    })
                } else {
                    // the reply claimed the entry just before the deadline
                    rx.await.unwrap_or_else(|_| Err(Error::ConnectionClosed))
                }
            }
        }
    }

    /// Register an event handler for a method-name pattern
    pub fn subscribe(&self, pattern: &str, handler: impl Fn(&EventFrame) + Send + Sync + 'static) {
        self.subscriptions.lock().push(EventSubscription {
            pattern: EventPattern::parse(pattern),
            handler: Arc::new(handler),
        });
    }

    /// Feed one parsed inbound frame through this correlator
    ///
    /// Replies claim their pending command; an id with no pending entry is
    /// logged and ignored since it may belong to a sibling correlator on
    /// the same transport. Events fan out to every matching subscription,
    /// each invocation isolated from the others.
    pub fn dispatch(&self, frame: &InboundFrame) {
        match frame {
            InboundFrame::Reply { id, result, error } => self.dispatch_reply(*id, result, error),
            InboundFrame::Event(event) => self.dispatch_event(event),
        }
    }

    fn dispatch_reply(&self, id: u64, result: &Option<Value>, error: &Option<ErrorBody>) {
        let Some(pending) = self.pending.lock().remove(&id) else {
            tracing::trace!(
                domain = %self.domain,
                id,
                "reply with no pending command (sibling correlator or already timed out)"
            );
            return;
        };
        let outcome = match error {
            Some(err) => Err(Error::protocol(&pending.method, err.code, &err.message)),
            None => Ok(result.clone().unwrap_or(Value::Null)),
        };
        // caller may have gone away; nothing more to do then
        let _ = pending.tx.send(outcome);
    }

    fn dispatch_event(&self, event: &EventFrame) {
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|sub| sub.pattern.matches(&event.method))
            .map(|sub| sub.handler.clone())
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    domain = %self.domain,
                    method = %event.method,
                    "event handler panicked"
                );
            }
        }
    }

    /// Fail every pending command immediately
    ///
    /// Used when the connection closes, instead of letting each command
    /// wait out its own timeout. Call before resetting [`CommandIds`].
    pub fn reject_all(&self) {
        let drained: Vec<PendingCommand> =
            self.pending.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            let _ = pending.tx.send(Err(Error::ConnectionClosed));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    use crate::cdp::types::parse_frame;

    fn correlator(timeout: Duration) -> (Arc<CommandCorrelator>, mpsc::UnboundedReceiver<Frame>) {
        let ids = Arc::new(CommandIds::new());
        let sink = OutboundSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.bind(tx);
        (
            Arc::new(CommandCorrelator::new("Debugger", ids, sink, timeout)),
            rx,
        )
    }

    fn sent_id(frame: &str) -> (u64, String) {
        let value: Value = serde_json::from_str(frame).unwrap();
        (
            value["id"].as_u64().unwrap(),
            value["method"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn reply_resolves_exactly_the_matching_command() {
        let (correlator, mut wire) = correlator(Duration::from_secs(5));

        let first = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("Debugger.pause", json!({})).await })
        };
        let second = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("Debugger.resume", json!({})).await })
        };

        let (id_a, method_a) = sent_id(&wire.recv().await.unwrap());
        let (id_b, _) = sent_id(&wire.recv().await.unwrap());
        let (pause_id, resume_id) = if method_a == "Debugger.pause" {
            (id_a, id_b)
        } else {
            (id_b, id_a)
        };

        let reply = parse_frame(&json!({"id": resume_id, "result": {"ok": true}}).to_string())
            .unwrap();
        correlator.dispatch(&reply);
        assert_eq!(second.await.unwrap().unwrap(), json!({"ok": true}));
        assert_eq!(correlator.pending_count(), 1);

        let reply = parse_frame(&json!({"id": pause_id, "result": {}}).to_string()).unwrap();
        correlator.dispatch(&reply);
        assert_eq!(first.await.unwrap().unwrap(), json!({}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn late_reply_after_timeout_has_no_effect() {
        let (correlator, mut wire) = correlator(Duration::from_millis(50));

        let err = correlator.send("Debugger.pause", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
        assert_eq!(correlator.pending_count(), 0);

        let (id, _) = sent_id(&wire.recv().await.unwrap());
        let reply = parse_frame(&json!({"id": id, "result": {}}).to_string()).unwrap();
        correlator.dispatch(&reply);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_reply_carries_message_and_code() {
        let (correlator, mut wire) = correlator(Duration::from_secs(5));

        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("Runtime.evaluate", json!({})).await })
        };

        let (id, _) = sent_id(&wire.recv().await.unwrap());
        let reply = parse_frame(
            &json!({"id": id, "error": {"message": "evaluation failed", "code": -32000}})
                .to_string(),
        )
        .unwrap();
        correlator.dispatch(&reply);

        match call.await.unwrap().unwrap_err() {
            Error::Protocol {
                method,
                code,
                message,
            } => {
                assert_eq!(method, "Runtime.evaluate");
                assert_eq!(code, -32000);
                assert_eq!(message, "evaluation failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unmatched_reply_is_ignored() {
        let (correlator, _wire) = correlator(Duration::from_secs(5));
        let reply = parse_frame(&json!({"id": 999, "result": {}}).to_string()).unwrap();
        // must not panic or disturb anything
        correlator.dispatch(&reply);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn events_fan_out_to_matching_subscriptions() {
        let (correlator, _wire) = correlator(Duration::from_secs(5));

        let exact = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));

        {
            let exact = exact.clone();
            correlator.subscribe("Debugger.paused", move |_| {
                exact.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let wildcard = wildcard.clone();
            correlator.subscribe("Debugger.*", move |_| {
                wildcard.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let any = any.clone();
            correlator.subscribe("*", move |_| {
                any.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let other = other.clone();
            correlator.subscribe("Profiler.*", move |_| {
                other.fetch_add(1, Ordering::SeqCst);
            });
        }

        let event = parse_frame(
            &json!({"method": "Debugger.paused", "params": {"reason": "other"}}).to_string(),
        )
        .unwrap();
        correlator.dispatch(&event);

        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_block_the_rest() {
        let (correlator, _wire) = correlator(Duration::from_secs(5));

        correlator.subscribe("*", |_| panic!("handler bug"));
        let reached = Arc::new(AtomicUsize::new(0));
        {
            let reached = reached.clone();
            correlator.subscribe("*", move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        let event =
            parse_frame(&json!({"method": "Debugger.resumed", "params": {}}).to_string()).unwrap();
        correlator.dispatch(&event);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reject_all_fails_pending_commands_without_waiting() {
        let (correlator, mut wire) = correlator(Duration::from_secs(30));

        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("Debugger.pause", json!({})).await })
        };
        // wait for the command to hit the wire so it is definitely pending
        wire.recv().await.unwrap();

        correlator.reject_all();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn shared_ids_are_unique_and_increasing() {
        let ids = CommandIds::new();
        let first = ids.next();
        let second = ids.next();
        let third = ids.next();
        assert!(first < second && second < third);
        ids.reset();
        assert_eq!(ids.next(), first);
    }

    #[tokio::test]
    async fn send_without_a_bound_sink_fails_fast() {
        let ids = Arc::new(CommandIds::new());
        let sink = OutboundSink::new();
        let correlator = CommandCorrelator::new("Debugger", ids, sink, Duration::from_secs(5));
        let err = correlator.send("Debugger.pause", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(correlator.pending_count(), 0);
    }
}
