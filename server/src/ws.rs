use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use lootrush_shared::protocol::{ClientMsg, ServerMsg};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::game_loop::{GameBroadcast, GameCommand};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub game_tx: mpsc::Sender<GameCommand>,
    pub broadcast_tx: broadcast::Sender<GameBroadcast>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub name: Option<String>,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, params.name))
}

fn encode(msg: &ServerMsg) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(err) => {
            tracing::error!("Failed to encode server message: {}", err);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: AppState, name: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before joining so nothing sent right after the join is missed
    let mut broadcast_rx = app_state.broadcast_tx.subscribe();

    // Join the game
    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .game_tx
        .send(GameCommand::PlayerJoin {
            name,
            response: resp_tx,
        })
        .await
        .is_err()
    {
        tracing::error!("Failed to send PlayerJoin command");
        return;
    }

    let (my_id, welcome) = match resp_rx.await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Failed to receive welcome");
            return;
        }
    };

    tracing::info!("Player {} connected", my_id);

    let Some(welcome) = encode(&ServerMsg::Welcome(welcome)) else {
        return;
    };
    if sink.send(welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => {
                                let cmd = GameCommand::Client { id: my_id, msg };
                                if app_state.game_tx.send(cmd).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!("Player {} sent unparseable message: {}", my_id, err);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Server -> Client (broadcast)
            result = broadcast_rx.recv() => {
                match result {
                    Ok(broadcast) => {
                        if !broadcast.is_for(my_id) {
                            continue; // Not for this client
                        }
                        if let Some(msg) = encode(&broadcast.to_server_msg()) {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Progress is the bulk of the traffic and is superseded by later reports
                        tracing::warn!("Player {} lagged by {} messages", my_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    let _ = app_state
        .game_tx
        .send(GameCommand::PlayerLeave { id: my_id })
        .await;
    tracing::info!("Player {} disconnected", my_id);
}
