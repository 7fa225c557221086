use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    application::state::SharedState,
    domain::models::{Command, ConnectionMode},
    interfaces::http::error_response,
    protocol::PushFrame,
    security::auth::authorize,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    device_id: String,
    #[serde(default)]
    token: Option<String>,
}

/// Upgrades to the push channel. Browsers cannot set headers on websocket
/// requests, so the token rides in the query string here.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Err(error) = authorize(&state.config().auth_mode, query.token.as_deref()) {
        return error_response(&error).into_response();
    }

    if query.device_id.trim().is_empty() {
        return error_response(&crate::domain::error::DomainError::Validation(
            "deviceId must not be empty".to_owned(),
        ))
        .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, query.device_id))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, device_id: String) {
    let (registration, mut commands) = match state.dispatch().register_push(&device_id).await {
        Ok(channel) => channel,
        Err(error) => {
            warn!("push registration failed device={device_id}: {error}");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    debug!("push channel open device={device_id}");

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        if send_command(&mut socket, command).await.is_err() {
                            break;
                        }
                    }
                    // Registry entry was replaced by a newer connection.
                    None => break,
                }
            }
            next = socket.recv() => {
                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        warn!("push channel read failed device={device_id}: {error}");
                        break;
                    }
                    None => break,
                };

                match message {
                    Message::Text(text) => {
                        handle_frame(&state, &device_id, text.as_str()).await;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        if let Err(error) = state.dispatch().record_push_contact(&device_id).await {
                            warn!("contact update failed device={device_id}: {error}");
                        }
                    }
                    Message::Close(_) => break,
                    Message::Binary(_) => {
                        debug!("ignoring binary frame device={device_id}");
                    }
                }
            }
        }
    }

    if let Err(error) = state.dispatch().unregister_push(&device_id, &registration).await {
        warn!("push unregister failed device={device_id}: {error}");
    }
    debug!("push channel closed device={device_id}");
}

async fn handle_frame(state: &SharedState, device_id: &str, text: &str) {
    let frame = match serde_json::from_str::<PushFrame>(text) {
        Ok(frame) => frame,
        Err(error) => {
            warn!("invalid push frame device={device_id}: {error}");
            return;
        }
    };

    match frame {
        PushFrame::Ack {
            command_id,
            status,
            detail,
        } => {
            if let Err(error) = state
                .acknowledge_command(&command_id, status, detail, ConnectionMode::Push)
                .await
            {
                warn!("push ack rejected command={command_id}: {error}");
            }
        }
        PushFrame::Command { .. } => {
            warn!("unexpected command frame from device={device_id}");
        }
    }
}

async fn send_command(socket: &mut WebSocket, command: Command) -> Result<(), ()> {
    let frame = PushFrame::Command { command };
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(error) => {
            warn!("failed to serialize command frame: {error}");
            return Err(());
        }
    };

    socket.send(Message::Text(text.into())).await.map_err(|error| {
        warn!("failed to send command frame: {error}");
    })
}
