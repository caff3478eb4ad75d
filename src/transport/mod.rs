//! Framed duplex transport abstraction
//!
//! Both the connection to the debug target and each attached client speak
//! the same shape: one complete JSON message per frame over a duplex
//! stream. The traits here let the relay and correlation layers stay
//! independent of which side of which socket a frame came from.

use async_trait::async_trait;

use crate::common::Result;

pub mod pair;
pub mod ws;

/// One complete protocol message
pub type Frame = String;

/// Write side of a framed transport
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the write side
    async fn close(&mut self) -> Result<()>;
}

/// Read side of a framed transport
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame
    ///
    /// `None` means the transport is closed; `Some(Err(_))` is a transport
    /// error after which no further frames will arrive.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

pub type BoxedSink = Box<dyn FrameSink>;
pub type BoxedSource = Box<dyn FrameSource>;
