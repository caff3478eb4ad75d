//! Client acceptor: HTTP listener that upgrades clients onto session relays

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::transport::ws;

use super::relay::{self, RelayRegistry};

const LIVENESS_MESSAGE: &str =
    "inspector-proxy: relay online. Attach a debugging client via WebSocket upgrade.\n";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RelayRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(accept_client)).with_state(state)
}

/// Plain requests get a static liveness message; upgrade requests become
/// session relays
async fn accept_client(
    State(state): State<AppState>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(upgrade) => upgrade
            .on_upgrade(move |socket| async move {
                let (sink, source) = ws::from_client_socket(socket);
                relay::serve_client(state.registry, sink, source).await;
            })
            .into_response(),
        None => LIVENESS_MESSAGE.into_response(),
    }
}
