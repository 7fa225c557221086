//! Wire contract shared by the edge client and the gateway handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::{AckStatus, AlertEvent, Command};

/// Status reported back for a submitted alert. A `duplicate` is a success:
/// it means the record is already durable on the cloud side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Received,
    Duplicate,
}

/// Alert submission body. The embedded `alert_id` is the idempotency token;
/// retransmitting the same event any number of times yields one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAlertRequest {
    #[serde(flatten)]
    pub event: AlertEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAlertResponse {
    pub alert_id: String,
    pub status: SubmitStatus,
}

/// Operator request to queue a command for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueCommandRequest {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueCommandResponse {
    pub command_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub status: AckStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Frames exchanged over the push channel. The server sends `command`
/// frames; the device answers with `ack` frames of the same shape the pull
/// path uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushFrame {
    #[serde(rename_all = "camelCase")]
    Command { command: Command },
    #[serde(rename_all = "camelCase")]
    Ack {
        command_id: String,
        status: AckStatus,
        #[serde(default)]
        detail: Option<String>,
    },
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

pub const ERROR_VALIDATION: &str = "VALIDATION";
pub const ERROR_PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
pub const ERROR_NOT_FOUND: &str = "NOT_FOUND";
pub const ERROR_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const ERROR_EXPIRED: &str = "EXPIRED";
pub const ERROR_UNAVAILABLE: &str = "UNAVAILABLE";
