//! Live-reload channel for development mode.
//!
//! All apps share one upgrade endpoint; the path token after the prefix is
//! the app id, so each client subscribes to exactly one app's reload
//! broadcasts. The dev loop publishes into the per-app sender after a
//! successful rebuild.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use futures::{SinkExt, StreamExt};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Shared upgrade endpoint prefix; clients connect to `<prefix>/<app id>`.
pub const HOT_ENDPOINT: &str = "/__appdock_hot";

const CHANNEL_CAPACITY: usize = 16;

/// Per-app broadcast channels, keyed by app id.
#[derive(Clone, Default)]
pub struct HotChannels {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl HotChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender for one app's channel, created on first use.
    pub fn sender(&self, id: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Broadcast to one app's subscribers. Returns how many received it.
    pub fn notify(&self, id: &str, message: &str) -> usize {
        self.sender(id).send(message.to_string()).unwrap_or(0)
    }
}

pub fn router(channels: HotChannels) -> Router {
    Router::new()
        .route(&format!("{}/{{app}}", HOT_ENDPOINT), get(ws_handler))
        .with_state(channels)
}

async fn ws_handler(
    State(channels): State<HotChannels>,
    Path(app): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(channels, app, socket))
}

async fn handle_socket(channels: HotChannels, app: String, socket: WebSocket) {
    let mut rx = channels.sender(&app).subscribe();
    debug!(%app, "hot client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "hot client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    // Clients never send anything meaningful; drain until they hang up.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!(%app, "hot client disconnected");
}
