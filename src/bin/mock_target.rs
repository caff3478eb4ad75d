//! Mock debug target binary for integration testing
//!
//! Serves a minimal inspector-style websocket endpoint and announces it on
//! stderr the way a real runtime would, so the proxy can be exercised
//! without one. Honors the `--inspect=<port>` flag the supervisor passes;
//! any other arguments (like the script path) are ignored.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() {
    let port = std::env::args()
        .find_map(|arg| {
            arg.strip_prefix("--inspect=")
                .and_then(|p| p.parse::<u16>().ok())
        })
        .unwrap_or(0);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind inspector port");
    let addr = listener.local_addr().expect("local addr");
    let session = format!("{:08x}", std::process::id());
    eprintln!(
        "Debugger listening on ws://127.0.0.1:{}/{}",
        addr.port(),
        session
    );

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => break,
        };
        tokio::spawn(serve_connection(stream));
    }
}

async fn serve_connection(stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut tx, mut rx) = ws.split();

    while let Some(Ok(msg)) = rx.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let (Some(id), Some(method)) = (
            frame.get("id").and_then(Value::as_u64),
            frame.get("method").and_then(Value::as_str),
        ) else {
            continue;
        };

        let reply = json!({ "id": id, "result": canned_result(method) });
        if tx.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }

        // pausing produces the matching event, like a real target
        if method == "Debugger.pause" {
            let event = json!({
                "method": "Debugger.paused",
                "params": { "reason": "other", "callFrames": [] }
            });
            if tx.send(Message::Text(event.to_string())).await.is_err() {
                break;
            }
        }
    }
}

fn canned_result(method: &str) -> Value {
    match method {
        "Debugger.setBreakpointByUrl" => json!({
            "breakpointId": "1:0:0:mock",
            "locations": [{ "scriptId": "1", "lineNumber": 0 }]
        }),
        "Runtime.evaluate" => json!({
            "result": { "type": "number", "value": 42, "description": "42" }
        }),
        "Runtime.getProperties" => json!({ "result": [] }),
        _ => json!({}),
    }
}
