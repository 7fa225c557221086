use std::time::Duration;

use crate::{
    domain::{
        error::DomainError,
        models::{ConnectionMode, DeviceSession},
    },
    storage::{SqliteStore, now_unix_ms},
};

/// Per-device liveness tracker. Every inbound contact (alert submission,
/// command poll, push traffic) funnels through `record_contact`; nothing
/// else mutates session state.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    store: SqliteStore,
    offline_threshold: Duration,
}

impl SessionTracker {
    #[must_use]
    pub fn new(store: SqliteStore, offline_threshold: Duration) -> Self {
        Self {
            store,
            offline_threshold,
        }
    }

    pub async fn record_contact(
        &self,
        device_id: &str,
        mode: ConnectionMode,
    ) -> Result<(), DomainError> {
        self.store
            .session_record_contact(device_id, mode, now_unix_ms())
            .await
    }

    /// Pure query over `last_seen_ms`. A device that has never made contact
    /// counts as offline.
    pub async fn is_offline(&self, device_id: &str) -> Result<bool, DomainError> {
        let Some(session) = self.store.get_session(device_id).await? else {
            return Ok(true);
        };
        let threshold_ms = self.offline_threshold.as_millis() as u64;
        Ok(now_unix_ms().saturating_sub(session.last_seen_ms) > threshold_ms)
    }

    pub async fn connection_mode(
        &self,
        device_id: &str,
    ) -> Result<Option<ConnectionMode>, DomainError> {
        Ok(self
            .store
            .get_session(device_id)
            .await?
            .map(|session| session.connection_mode))
    }

    pub async fn get(&self, device_id: &str) -> Result<Option<DeviceSession>, DomainError> {
        let Some(session) = self.store.get_session(device_id).await? else {
            return Ok(None);
        };
        let pending = self.store.count_pending_commands(device_id).await?;
        Ok(Some(DeviceSession {
            device_id: session.device_id,
            last_seen_ms: session.last_seen_ms,
            connection_mode: session.connection_mode,
            pending_command_count: pending,
        }))
    }

    pub async fn list(&self) -> Result<Vec<DeviceSession>, DomainError> {
        let rows = self.store.list_sessions().await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let pending = self.store.count_pending_commands(&row.device_id).await?;
            sessions.push(DeviceSession {
                device_id: row.device_id,
                last_seen_ms: row.last_seen_ms,
                connection_mode: row.connection_mode,
                pending_command_count: pending,
            });
        }
        Ok(sessions)
    }
}
