use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Intrusion,
    Fire,
    Attendance,
    Smoker,
    Loitering,
    Queue,
    Other,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intrusion => "intrusion",
            Self::Fire => "fire",
            Self::Attendance => "attendance",
            Self::Smoker => "smoker",
            Self::Loitering => "loitering",
            Self::Queue => "queue",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "intrusion" => Ok(Self::Intrusion),
            "fire" => Ok(Self::Fire),
            "attendance" => Ok(Self::Attendance),
            "smoker" => Ok(Self::Smoker),
            "loitering" => Ok(Self::Loitering),
            "queue" => Ok(Self::Queue),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown event type: {other}")),
        }
    }

    /// Fire alerts are never dropped by the outbox capacity policy.
    #[must_use]
    pub fn is_droppable(self) -> bool {
        !matches!(self, Self::Fire)
    }
}

/// Detection region in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A detection event produced at the edge. `alert_id` is assigned by the
/// device at creation time and doubles as the idempotency key; it never
/// changes once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub alert_id: String,
    pub device_id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    pub camera_id: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub event_type: EventType,
    pub confidence: f64,
    #[serde(default)]
    pub coordinates: Option<Region>,
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "snapshot_base64"
    )]
    pub snapshot: Option<Vec<u8>>,
    #[serde(default)]
    pub extra: Value,
}

/// Snapshot bytes travel base64-encoded inside the JSON envelope.
mod snapshot_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl AlertEvent {
    #[must_use]
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Outbox lifecycle of an alert on the edge. Acknowledged entries are
/// removed rather than kept in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    Pending,
    InFlight,
}

impl OutboxState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            other => Err(format!("unknown outbox state: {other}")),
        }
    }
}

/// An alert queued on the edge awaiting confirmed delivery.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub event: AlertEvent,
    pub state: OutboxState,
    pub attempts: u32,
    pub created_at_ms: u64,
}

/// An alert as persisted by the cloud ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    #[serde(flatten)]
    pub event: AlertEvent,
    pub received_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Restart,
    UpdateConfig,
    Healthcheck,
    Custom,
}

impl CommandAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::UpdateConfig => "update_config",
            Self::Healthcheck => "healthcheck",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "restart" => Ok(Self::Restart),
            "update_config" => Ok(Self::UpdateConfig),
            "healthcheck" => Ok(Self::Healthcheck),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown command action: {other}")),
        }
    }
}

/// Cloud-side command lifecycle. A command is delivered at least once;
/// the edge inbox guarantees at most one execution per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Queued,
    Delivered,
    Acknowledged,
    Failed,
    Expired,
}

impl CommandState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "queued" => Ok(Self::Queued),
            "delivered" => Ok(Self::Delivered),
            "acknowledged" => Ok(Self::Acknowledged),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown command state: {other}")),
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed | Self::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: String,
    pub device_id: String,
    pub action: CommandAction,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Command {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Full dispatcher-side view of a command including lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    #[serde(flatten)]
    pub command: Command,
    pub state: CommandState,
    pub created_at_ms: u64,
    pub delivered_at_ms: Option<u64>,
    pub ack_deadline_ms: Option<u64>,
    pub acked_at_ms: Option<u64>,
    pub detail: Option<String>,
}

/// Outcome reported by the edge after (attempting) command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Acknowledged,
    Failed,
}

impl AckStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "acknowledged" => Ok(Self::Acknowledged),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ack status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Polling,
    Push,
}

impl ConnectionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Push => "push",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "polling" => Ok(Self::Polling),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown connection mode: {other}")),
        }
    }
}

/// Per-device liveness state inferred from recent contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    pub device_id: String,
    pub last_seen_ms: u64,
    pub connection_mode: ConnectionMode,
    pub pending_command_count: u64,
}
