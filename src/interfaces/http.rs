use std::{future::Future, net::SocketAddr};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    application::state::SharedState,
    domain::{error::DomainError, models::ConnectionMode},
    interfaces::ws,
    protocol::{
        AckRequest, ERROR_EXPIRED, ERROR_NOT_FOUND, ERROR_PAYLOAD_TOO_LARGE, ERROR_UNAUTHORIZED,
        ERROR_UNAVAILABLE, ERROR_VALIDATION, EnqueueCommandRequest, EnqueueCommandResponse,
        ErrorBody, PollResponse, SubmitAlertRequest,
    },
    security::auth::authorize,
};

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/v1/alerts", post(submit_alert_handler).get(list_alerts_handler))
        .route("/v1/alerts/{alert_id}", get(get_alert_handler))
        .route("/v1/commands", post(enqueue_command_handler))
        .route("/v1/commands/{command_id}", get(get_command_handler))
        .route("/v1/commands/{command_id}/ack", post(ack_command_handler))
        .route(
            "/v1/devices/{device_id}/commands/poll",
            post(poll_commands_handler),
        )
        .route("/v1/devices", get(list_devices_handler))
        .route("/v1/devices/{device_id}", get(get_device_handler))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DomainError> {
    let local_addr = listener.local_addr().map_err(|error| {
        DomainError::Unavailable(format!("failed to read listener address: {error}"))
    })?;

    info!(
        "quieteye gateway listening on http://{}:{}, auth_mode={}",
        local_addr.ip(),
        local_addr.port(),
        state.auth_mode_label(),
    );

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|error| DomainError::Unavailable(format!("server runtime error: {error}")))
}

/// Maps the domain taxonomy onto wire statuses. Transient classes land on
/// 503 so edge clients retry with backoff; everything else is terminal for
/// the caller.
pub fn error_response(error: &DomainError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code) = match error {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, ERROR_VALIDATION),
        DomainError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, ERROR_PAYLOAD_TOO_LARGE),
        DomainError::NotFound(_) => (StatusCode::NOT_FOUND, ERROR_NOT_FOUND),
        DomainError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, ERROR_UNAUTHORIZED),
        DomainError::Expired(_) => (StatusCode::GONE, ERROR_EXPIRED),
        DomainError::Capacity(_)
        | DomainError::Transient(_)
        | DomainError::Storage(_)
        | DomainError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, ERROR_UNAVAILABLE),
    };
    (status, Json(ErrorBody::new(code, error.to_string())))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn require_auth(state: &SharedState, headers: &HeaderMap) -> Result<(), DomainError> {
    authorize(&state.config().auth_mode, bearer_token(headers))
}

async fn submit_alert_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    let request = match serde_json::from_value::<SubmitAlertRequest>(body) {
        Ok(request) => request,
        Err(error) => {
            return error_response(&DomainError::Validation(format!("invalid alert: {error}")))
                .into_response();
        }
    };

    match state.submit_alert(request.event).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertsQuery {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_alerts_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    let limit = query.limit.unwrap_or(100).min(1_000);
    match state.list_alerts(query.device_id.as_deref(), limit).await {
        Ok(alerts) => (StatusCode::OK, Json(json!({ "alerts": alerts }))).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn get_alert_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(alert_id): Path<String>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    match state.get_alert(&alert_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => error_response(&DomainError::NotFound(format!(
            "alert not found: {alert_id}"
        )))
        .into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn enqueue_command_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    let request = match serde_json::from_value::<EnqueueCommandRequest>(body) {
        Ok(request) => request,
        Err(error) => {
            return error_response(&DomainError::Validation(format!("invalid command: {error}")))
                .into_response();
        }
    };

    match state.enqueue_command(request).await {
        Ok(record) => (
            StatusCode::OK,
            Json(EnqueueCommandResponse {
                command_id: record.command.command_id,
                state: record.state.as_str().to_owned(),
            }),
        )
            .into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn get_command_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(command_id): Path<String>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    match state.get_command(&command_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn ack_command_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(command_id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    let request = match serde_json::from_value::<AckRequest>(body) {
        Ok(request) => request,
        Err(error) => {
            return error_response(&DomainError::Validation(format!("invalid ack: {error}")))
                .into_response();
        }
    };

    match state
        .acknowledge_command(&command_id, request.status, request.detail, ConnectionMode::Polling)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({
                "commandId": record.command.command_id,
                "state": record.state.as_str(),
            })),
        )
            .into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn poll_commands_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    match state.poll_commands(&device_id).await {
        Ok(commands) => (StatusCode::OK, Json(PollResponse { commands })).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn list_devices_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    match state.list_sessions().await {
        Ok(sessions) => (StatusCode::OK, Json(json!({ "devices": sessions }))).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

async fn get_device_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    if let Err(error) = require_auth(&state, &headers) {
        return error_response(&error).into_response();
    }

    let session = match state.get_session(&device_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return error_response(&DomainError::NotFound(format!(
                "device not found: {device_id}"
            )))
            .into_response();
        }
        Err(error) => return error_response(&error).into_response(),
    };

    match state.device_is_offline(&device_id).await {
        Ok(offline) => {
            let mut payload = json!(session);
            payload["offline"] = json!(offline);
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(&error).into_response(),
    }
}

async fn healthz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.health_payload().await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ok": false,
                "error": error.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn readyz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "version": state.config().runtime_version,
            "uptimeMs": state.uptime_ms(),
        })),
    )
}
