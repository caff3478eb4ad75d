//! WebSocket frame transports
//!
//! Two flavours: an outbound connection to the target's debug endpoint
//! (tokio-tungstenite) and the wrapper for client sockets accepted through
//! the HTTP listener (axum). Only text frames carry protocol messages;
//! ping/pong and binary frames are skipped.

use async_trait::async_trait;
use axum::extract::ws;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{BoxedSink, BoxedSource, Frame, FrameSink, FrameSource};
use crate::common::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a websocket connection and split it into transport halves
pub async fn connect(url: &str) -> Result<(BoxedSink, BoxedSource)> {
    let (stream, _response) = connect_async(url).await?;
    let (tx, rx) = stream.split();
    Ok((Box::new(WsSink(tx)), Box::new(WsSource(rx))))
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0.send(Message::Text(frame)).await.map_err(Error::from)
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await.map_err(Error::from)
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        while let Some(item) = self.0.next().await {
            match item {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::from(e))),
            }
        }
        None
    }
}

/// Wrap an accepted client websocket into transport halves
pub fn from_client_socket(socket: ws::WebSocket) -> (BoxedSink, BoxedSource) {
    let (tx, rx) = socket.split();
    (Box::new(ClientSink(tx)), Box::new(ClientSource(rx)))
}

struct ClientSink(SplitSink<ws::WebSocket, ws::Message>);

#[async_trait]
impl FrameSink for ClientSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0
            .send(ws::Message::Text(frame))
            .await
            .map_err(|e| Error::ClientTransport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| Error::ClientTransport(e.to_string()))
    }
}

struct ClientSource(SplitStream<ws::WebSocket>);

#[async_trait]
impl FrameSource for ClientSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        while let Some(item) = self.0.next().await {
            match item {
                Ok(ws::Message::Text(text)) => return Some(Ok(text)),
                Ok(ws::Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::ClientTransport(e.to_string()))),
            }
        }
        None
    }
}
