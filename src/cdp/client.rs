//! Typed protocol client façade
//!
//! Composes one correlator per protocol domain over a single connection and
//! exposes friendly debugging operations on top. Every inbound frame is
//! handed to every correlator; each correlator's own id and pattern
//! matching decides relevance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use crate::common::{Error, Result};
use crate::transport::{ws, BoxedSink, BoxedSource};

use super::correlator::{CommandCorrelator, CommandIds, OutboundSink};
use super::types::{
    parse_frame, DebuggerEvent, EvaluateResult, EventFrame, EventPattern, GetPropertiesResult,
    PropertyDescriptor, SetBreakpointResult,
};

/// Connection status surfaced to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

/// Options for [`ProtocolClient::set_breakpoint`]
#[derive(Debug, Clone, Default)]
pub struct BreakpointOptions {
    pub column: Option<u64>,
    pub condition: Option<String>,
}

/// Options for [`ProtocolClient::evaluate`]
#[derive(Debug, Clone, Default)]
pub struct EvaluateOptions {
    pub return_by_value: bool,
    pub generate_preview: bool,
}

const EXECUTION_DOMAIN: &str = "Debugger";
const EVALUATION_DOMAIN: &str = "Runtime";

/// Reply deadline used by [`ProtocolClient::default`]
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// High-level client for one debug connection
pub struct ProtocolClient {
    ids: Arc<CommandIds>,
    sink: OutboundSink,
    correlators: Vec<Arc<CommandCorrelator>>,
    status_tx: watch::Sender<ConnectionStatus>,
    generation: Arc<AtomicU64>,
}

impl Default for ProtocolClient {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl ProtocolClient {
    pub fn new(command_timeout: Duration) -> Self {
        let ids = Arc::new(CommandIds::new());
        let sink = OutboundSink::new();
        let correlators = vec![
            Arc::new(CommandCorrelator::new(
                EXECUTION_DOMAIN,
                ids.clone(),
                sink.clone(),
                command_timeout,
            )),
            Arc::new(CommandCorrelator::new(
                EVALUATION_DOMAIN,
                ids.clone(),
                sink.clone(),
                command_timeout,
            )),
        ];
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            ids,
            sink,
            correlators,
            status_tx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the websocket connection and start the frame pump
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.sink.is_bound() {
            return Err(Error::AlreadyConnected);
        }
        let (sink, source) = ws::connect(url).await?;
        tracing::info!(url, "protocol client connected");
        self.attach(sink, source);
        Ok(())
    }

    /// Wire an already-open transport (used by tests and embedders)
    pub fn attach(&self, mut sink: BoxedSink, mut source: BoxedSource) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // pending commands from a previous connection were rejected on
        // disconnect, so the counter can restart without id reuse
        self.ids.reset();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        self.sink.bind(out_tx);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let correlators = self.correlators.clone();
        let shared_sink = self.sink.clone();
        let status_tx = self.status_tx.clone();
        let generations = self.generation.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next_frame().await {
                let text = match item {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "transport error");
                        break;
                    }
                };
                match parse_frame(&text) {
                    Ok(frame) => {
                        for correlator in &correlators {
                            correlator.dispatch(&frame);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                }
            }
            // a stale pump from a replaced connection must not tear down
            // its replacement
            if generations.load(Ordering::SeqCst) == generation {
                shared_sink.clear();
                for correlator in &correlators {
                    correlator.reject_all();
                }
                let _ = status_tx.send(ConnectionStatus::Disconnected);
            }
        });

        let _ = self.status_tx.send(ConnectionStatus::Connected);
    }

    /// Drop the connection, rejecting every pending command immediately
    /// rather than letting each wait out its own timeout
    pub fn disconnect(&self) {
        self.sink.clear();
        for correlator in &self.correlators {
            correlator.reject_all();
        }
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }

    /// Reconnect to a (possibly new) endpoint
    pub async fn reconnect(&self, url: &str) -> Result<()> {
        self.disconnect();
        self.connect(url).await
    }

    /// Watch connected/disconnected transitions
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    fn execution(&self) -> &CommandCorrelator {
        &self.correlators[0]
    }

    fn evaluation(&self) -> &CommandCorrelator {
        &self.correlators[1]
    }

    // === Execution control ===

    /// Enable the execution-control and evaluation domains
    ///
    /// Most targets require this before any other command takes effect.
    pub async fn enable(&self) -> Result<()> {
        self.execution().send("Debugger.enable", json!({})).await?;
        self.evaluation().send("Runtime.enable", json!({})).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.execution()
            .send("Debugger.pause", json!({}))
            .await
            .map(drop)
    }

    pub async fn resume(&self) -> Result<()> {
        self.execution()
            .send("Debugger.resume", json!({}))
            .await
            .map(drop)
    }

    pub async fn step_over(&self) -> Result<()> {
        self.execution()
            .send("Debugger.stepOver", json!({}))
            .await
            .map(drop)
    }

    pub async fn step_into(&self) -> Result<()> {
        self.execution()
            .send("Debugger.stepInto", json!({}))
            .await
            .map(drop)
    }

    pub async fn step_out(&self) -> Result<()> {
        self.execution()
            .send("Debugger.stepOut", json!({}))
            .await
            .map(drop)
    }

    // === Breakpoints ===

    /// Set a breakpoint by script URL and zero-based line number
    pub async fn set_breakpoint(
        &self,
        url: &str,
        line: u64,
        options: BreakpointOptions,
    ) -> Result<SetBreakpointResult> {
        let mut params = json!({ "url": url, "lineNumber": line });
        if let Some(column) = options.column {
            params["columnNumber"] = json!(column);
        }
        if let Some(condition) = options.condition {
            params["condition"] = json!(condition);
        }
        let result = self
            .execution()
            .send("Debugger.setBreakpointByUrl", params)
            .await?;
        serde_json::from_value(result).map_err(Error::from)
    }

    pub async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<()> {
        self.execution()
            .send(
                "Debugger.removeBreakpoint",
                json!({ "breakpointId": breakpoint_id }),
            )
            .await
            .map(drop)
    }

    // === Evaluation ===

    /// Evaluate an expression in the target
    pub async fn evaluate(
        &self,
        expression: &str,
        options: EvaluateOptions,
    ) -> Result<EvaluateResult> {
        let params = json!({
            "expression": expression,
            "returnByValue": options.return_by_value,
            "generatePreview": options.generate_preview,
        });
        let result = self.evaluation().send("Runtime.evaluate", params).await?;
        serde_json::from_value(result).map_err(Error::from)
    }

    /// List own properties of a mirrored object
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>> {
        let result = self
            .evaluation()
            .send(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true }),
            )
            .await?;
        let parsed: GetPropertiesResult = serde_json::from_value(result)?;
        Ok(parsed.result)
    }

    // === Events ===

    /// Subscribe a raw handler by method-name pattern (`Debugger.paused`,
    /// `Debugger.*`, `*`)
    ///
    /// The handler runs on the frame pump task; keep it short.
    pub fn on_event(&self, pattern: &str, handler: impl Fn(&EventFrame) + Send + Sync + 'static) {
        self.correlator_for(&EventPattern::parse(pattern))
            .subscribe(pattern, handler);
    }

    /// Stream of known, decoded events
    pub fn events(&self) -> mpsc::UnboundedReceiver<DebuggerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.execution().subscribe("*", move |frame| {
            if let Some(event) = DebuggerEvent::from_frame(frame) {
                let _ = tx.send(event);
            }
        });
        rx
    }

    /// Pick the correlator owning a pattern's domain, so a handler fires
    /// once per event even though every correlator sees every frame
    fn correlator_for(&self, pattern: &EventPattern) -> &Arc<CommandCorrelator> {
        pattern
            .domain()
            .and_then(|domain| self.correlators.iter().find(|c| c.domain() == domain))
            .unwrap_or(&self.correlators[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pair::pair;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    /// Drive the far side of a pair transport like a tiny debug target
    async fn respond(
        source: &mut crate::transport::BoxedSource,
        sink: &mut crate::transport::BoxedSink,
        result: Value,
    ) {
        let frame = timeout(WAIT, source.next_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        let id = value["id"].as_u64().unwrap();
        sink.send(json!({"id": id, "result": result}).to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn typed_operations_translate_to_wire_commands() {
        let (client_side, (mut target_sink, mut target_source)) = pair();
        let client = Arc::new(ProtocolClient::new(Duration::from_secs(5)));
        client.attach(client_side.0, client_side.1);

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.pause().await })
        };

        let frame = timeout(WAIT, target_source.next_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["method"], "Debugger.pause");

        let id = value["id"].as_u64().unwrap();
        target_sink
            .send(json!({"id": id, "result": {}}).to_string())
            .await
            .unwrap();
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn evaluate_round_trip_parses_typed_result() {
        let (client_side, (mut target_sink, mut target_source)) = pair();
        let client = Arc::new(ProtocolClient::new(Duration::from_secs(5)));
        client.attach(client_side.0, client_side.1);

        let call = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .evaluate("6 * 7", EvaluateOptions {
                        return_by_value: true,
                        ..Default::default()
                    })
                    .await
            })
        };

        respond(
            &mut target_source,
            &mut target_sink,
            json!({"result": {"type": "number", "value": 42, "description": "42"}}),
        )
        .await;

        let evaluation = call.await.unwrap().unwrap();
        assert_eq!(evaluation.result.object_type, "number");
        assert_eq!(evaluation.result.value, Some(json!(42)));
        assert!(evaluation.exception_details.is_none());
    }

    #[tokio::test]
    async fn disconnect_rejects_pending_and_flips_status() {
        let (client_side, _target_side) = pair();
        let client = Arc::new(ProtocolClient::new(Duration::from_secs(30)));
        let mut status = client.status();
        client.attach(client_side.0, client_side.1);

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.pause().await })
        };
        // let the command become pending before cutting the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.disconnect();
        let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        timeout(WAIT, async {
            loop {
                status.changed().await.unwrap();
                if *status.borrow_and_update() == ConnectionStatus::Disconnected {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }
}
