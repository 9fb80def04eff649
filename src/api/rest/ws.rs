use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn driver_offers_handler(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.topics.subscribe_driver_feed(driver_id);
    ws.on_upgrade(move |socket| forward_feed(socket, rx, "driver-offers"))
}

pub async fn delivery_feed_handler(
    ws: WebSocketUpgrade,
    Path(delivery_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.topics.subscribe_delivery_feed(delivery_id);
    ws.on_upgrade(move |socket| forward_feed(socket, rx, "delivery-lifecycle"))
}

pub async fn delivery_location_handler(
    ws: WebSocketUpgrade,
    Path(delivery_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.topics.subscribe_location_feed(delivery_id);
    ws.on_upgrade(move |socket| forward_feed(socket, rx, "driver-location"))
}

async fn forward_feed<T>(socket: WebSocket, rx: broadcast::Receiver<T>, feed: &'static str)
where
    T: Serialize + Clone + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(rx);

    info!(feed, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(result) = events.next().await {
            let event = match result {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(feed, skipped, "websocket client lagged");
                    continue;
                }
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(feed, error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(feed, "websocket client disconnected");
}
