//! Debug endpoint discovery
//!
//! The runtime announces its inspector endpoint on stderr as
//! `Debugger listening on ws://<host>:<port>/<session-id>`, interleaved
//! with whatever else the target prints. The first match wins.

use regex::Regex;
use std::sync::OnceLock;

fn endpoint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"ws://[^\s'"]+"#).expect("valid endpoint pattern"))
}

/// Extract the debug endpoint address from one line of target output
pub fn scan_line(line: &str) -> Option<&str> {
    endpoint_pattern().find(line).map(|m| m.as_str())
}
