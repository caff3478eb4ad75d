//! inspector-proxy - supervise a debuggable process and relay its inspector
//! protocol to any number of attached clients
//!
//! The crate spawns the debug target, discovers its `ws://` debug endpoint
//! from the target's output, and forwards protocol frames between the
//! target and attached clients. The `cdp` module adds command/response
//! correlation and a typed API on top of the raw frame stream.

pub mod cdp;
pub mod common;
pub mod proxy;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use proxy::Proxy;
