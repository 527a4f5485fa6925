//! WebSocket upgrade and per-connection handler. Sends the cached snapshot on
//! connect, then every broadcast one.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

use std::sync::atomic::Ordering;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let clients = state.client_count.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(clients, "client connected");

    // Ensure we decrement on disconnect (drop).
    struct ClientGuard(AppState);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            self.0.client_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
    let _guard = ClientGuard(state.clone());

    // subscribe before reading the cache so nothing published in between is lost
    let mut updates = state.updates.subscribe();
    let (mut sink, mut stream) = socket.split();

    let cached = state.last_json.read().await.clone();
    if !cached.is_empty() && sink.send(Message::Text(cached)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "slow client, snapshots dropped"),
                Err(RecvError::Closed) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) if text == "ping" => {
                    if sink.send(Message::Text("pong!".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("client disconnected");
}
