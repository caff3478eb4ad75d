//! In-memory duplex transport
//!
//! Frames sent on one endpoint arrive on the other. Used by tests and
//! embedders that want to drive the relay or correlation layers without a
//! socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BoxedSink, BoxedSource, Frame, FrameSink, FrameSource};
use crate::common::{Error, Result};

/// Create a connected pair of transports
pub fn pair() -> ((BoxedSink, BoxedSource), (BoxedSink, BoxedSource)) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        (
            Box::new(ChannelSink(Some(a_tx))),
            Box::new(ChannelSource(a_rx)),
        ),
        (
            Box::new(ChannelSink(Some(b_tx))),
            Box::new(ChannelSource(b_rx)),
        ),
    )
}

struct ChannelSink(Option<mpsc::UnboundedSender<Frame>>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        match &self.0 {
            Some(tx) => tx.send(frame).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.0.take();
        Ok(())
    }
}

struct ChannelSource(mpsc::UnboundedReceiver<Frame>);

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.0.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair_in_order() {
        let ((mut a_sink, _a_source), (_b_sink, mut b_source)) = pair();
        a_sink.send("one".to_string()).await.unwrap();
        a_sink.send("two".to_string()).await.unwrap();
        assert_eq!(b_source.next_frame().await.unwrap().unwrap(), "one");
        assert_eq!(b_source.next_frame().await.unwrap().unwrap(), "two");
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let ((mut a_sink, _a_source), (_b_sink, mut b_source)) = pair();
        a_sink.close().await.unwrap();
        assert!(b_source.next_frame().await.is_none());
        assert!(a_sink.send("late".to_string()).await.is_err());
    }
}
