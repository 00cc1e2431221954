use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::broadcast::error::RecvError,
    time::{interval, timeout, Duration},
};

use crate::{
    api::AppState,
    constants::{WS_CLIENT_TIMEOUT_SECS, WS_HEARTBEAT_INTERVAL_SECS},
    models::WorldState,
};

fn connected_payload(world: Option<&WorldState>) -> String {
    serde_json::json!({
        "type": "connected",
        "world": world,
    })
    .to_string()
}

/// GET /api/realtime
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no event falls in between.
    let mut rx = state.hub.subscribe();

    let world = match state.world_service().get_state().await {
        Ok(world) => Some(world),
        Err(e) => {
            tracing::warn!("Realtime snapshot unavailable: {}", e);
            None
        }
    };
    if sender
        .send(Message::Text(connected_payload(world.as_ref()).into()))
        .await
        .is_err()
    {
        return;
    }
    tracing::info!("Realtime client connected ({} subscribers)", state.hub.subscriber_count());

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = interval(Duration::from_secs(WS_HEARTBEAT_INTERVAL_SECS));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let json = match serde_json::to_string(&event) {
                                Ok(json) => json,
                                Err(e) => {
                                    tracing::error!("Failed to encode realtime event: {}", e);
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!("Realtime client lagged, skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        loop {
            let next_msg =
                timeout(Duration::from_secs(WS_CLIENT_TIMEOUT_SECS), receiver.next()).await;
            let msg = match next_msg {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => {
                    tracing::info!("Realtime client timeout");
                    break;
                }
            };

            match msg {
                Message::Close(_) => break,
                Message::Text(text) => tracing::debug!("Ignoring client message: {}", text),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    tracing::info!("Realtime client disconnected");
}
