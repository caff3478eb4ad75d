//! Inspector protocol support: wire types, command correlation, and the
//! typed client façade

pub mod client;
pub mod correlator;
pub mod types;

pub use client::{
    BreakpointOptions, ConnectionStatus, EvaluateOptions, ProtocolClient, DEFAULT_COMMAND_TIMEOUT,
};
pub use correlator::{CommandCorrelator, CommandIds, OutboundSink};
pub use types::{DebuggerEvent, EventFrame, EventPattern, InboundFrame};
