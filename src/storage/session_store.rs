use crate::{
    domain::{error::DomainError, models::ConnectionMode},
    storage::{SqliteStore, util},
};

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub device_id: String,
    pub last_seen_ms: u64,
    pub connection_mode: ConnectionMode,
}

impl SqliteStore {
    pub async fn session_record_contact(
        &self,
        device_id: &str,
        mode: ConnectionMode,
        now_ms: u64,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO device_sessions(device_id, last_seen_ms, connection_mode) \
             VALUES(?, ?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET \
               last_seen_ms = excluded.last_seen_ms, \
               connection_mode = excluded.connection_mode",
        )
        .bind(device_id)
        .bind(util::ms_to_i64(now_ms))
        .bind(mode.as_str())
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to record contact: {error}")))?;
        Ok(())
    }

    pub async fn get_session(&self, device_id: &str) -> Result<Option<SessionRow>, DomainError> {
        let row = sqlx::query_as::<_, (String, i64, String)>(
            "SELECT device_id, last_seen_ms, connection_mode \
             FROM device_sessions WHERE device_id = ? LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to get session: {error}")))?;

        row.map(map_session_row).transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRow>, DomainError> {
        let rows = sqlx::query_as::<_, (String, i64, String)>(
            "SELECT device_id, last_seen_ms, connection_mode \
             FROM device_sessions ORDER BY last_seen_ms DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to list sessions: {error}")))?;

        rows.into_iter().map(map_session_row).collect()
    }
}

fn map_session_row(row: (String, i64, String)) -> Result<SessionRow, DomainError> {
    let (device_id, last_seen_ms, connection_mode) = row;
    let connection_mode = ConnectionMode::parse(&connection_mode).map_err(DomainError::Storage)?;

    Ok(SessionRow {
        device_id,
        last_seen_ms: util::i64_to_u64(last_seen_ms),
        connection_mode,
    })
}
