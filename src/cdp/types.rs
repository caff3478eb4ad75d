//! Inspector protocol message types
//!
//! One JSON object per frame. Commands and their replies carry an id;
//! events do not.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Outgoing command frame `{id, method, params}`
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl CommandFrame<'_> {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

/// Error payload of an error reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: i64,
}

/// An event frame: method plus params, no id
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub method: String,
    pub params: Value,
}

/// A parsed inbound frame
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Reply to a command: result or error
    Reply {
        id: u64,
        result: Option<Value>,
        error: Option<ErrorBody>,
    },
    /// Unsolicited event
    Event(EventFrame),
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<ErrorBody>,
}

/// Classify one wire frame
///
/// Frames that are neither a reply nor an event are malformed; the caller
/// logs and drops them without tearing down the session.
pub fn parse_frame(text: &str) -> Result<InboundFrame> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| Error::MalformedFrame(format!("{e} in {}", excerpt(text))))?;
    match raw {
        RawFrame {
            id: Some(id),
            result,
            error,
            ..
        } if result.is_some() || error.is_some() => Ok(InboundFrame::Reply { id, result, error }),
        RawFrame {
            id: None,
            method: Some(method),
            params,
            ..
        } => Ok(InboundFrame::Event(EventFrame {
            method,
            params: params.unwrap_or(Value::Null),
        })),
        _ => Err(Error::MalformedFrame(excerpt(text))),
    }
}

fn excerpt(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(LIMIT).collect();
        out.push('…');
        out
    }
}

/// Subscription pattern for event methods: exact (`Debugger.paused`),
/// domain wildcard (`Debugger.*`), or match-all (`*`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    Exact(String),
    Domain(String),
    Any,
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Any;
        }
        match pattern.strip_suffix(".*") {
            Some(domain) => Self::Domain(domain.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == method,
            Self::Domain(domain) => method
                .strip_prefix(domain.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
        }
    }

    /// Domain this pattern is scoped to, if any
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Exact(method) => method.split_once('.').map(|(domain, _)| domain),
            Self::Domain(domain) => Some(domain),
        }
    }
}

// === Typed protocol shapes ===

/// Source location within a script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u64>,
}

/// A value mirrored from the debuggee
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub subtype: Option<String>,
    pub value: Option<Value>,
    pub description: Option<String>,
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub line_number: u64,
    pub exception: Option<RemoteObject>,
}

/// Result of setting a breakpoint by script URL
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointResult {
    pub breakpoint_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// Result of evaluating an expression
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub enumerable: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}

/// One frame of the paused call stack
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedParams {
    pub reason: String,
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedParams {
    pub script_id: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledParams {
    #[serde(rename = "type")]
    pub call_type: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
}

/// Known inspector events, decoded through a fixed method table
///
/// Unknown methods fall through to raw subscription dispatch only.
#[derive(Debug, Clone)]
pub enum DebuggerEvent {
    Paused(PausedParams),
    Resumed,
    ScriptParsed(ScriptParsedParams),
    ExceptionThrown { text: String },
    ConsoleApiCalled(ConsoleApiCalledParams),
}

impl DebuggerEvent {
    pub fn from_frame(frame: &EventFrame) -> Option<Self> {
        let event = match frame.method.as_str() {
            "Debugger.paused" => {
                Self::Paused(serde_json::from_value(frame.params.clone()).ok()?)
            }
            "Debugger.resumed" => Self::Resumed,
            "Debugger.scriptParsed" => {
                Self::ScriptParsed(serde_json::from_value(frame.params.clone()).ok()?)
            }
            "Runtime.exceptionThrown" => {
                let text = frame
                    .params
                    .get("exceptionDetails")
                    .and_then(|d| d.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("uncaught exception")
                    .to_string();
                Self::ExceptionThrown { text }
            }
            "Runtime.consoleAPICalled" => {
                Self::ConsoleApiCalled(serde_json::from_value(frame.params.clone()).ok()?)
            }
            _ => return None,
        };
        Some(event)
    }
}
