use crate::{
    domain::{
        error::DomainError,
        models::{AckStatus, Command, CommandAction, CommandRecord, CommandState},
    },
    storage::{SqliteStore, util},
};

type CommandRow = (
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<String>,
);

const COMMAND_COLUMNS: &str = "command_id, device_id, action, params_json, state, expires_at_ms, \
     created_at_ms, delivered_at_ms, ack_deadline_ms, acked_at_ms, detail";

impl SqliteStore {
    pub async fn command_insert(&self, record: &CommandRecord) -> Result<(), DomainError> {
        let params_json =
            util::value_to_json_text(&record.command.params).map_err(DomainError::Storage)?;

        sqlx::query(
            "INSERT INTO commands(command_id, device_id, action, params_json, state, expires_at_ms, created_at_ms, delivered_at_ms, ack_deadline_ms, acked_at_ms, detail) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.command.command_id)
        .bind(&record.command.device_id)
        .bind(record.command.action.as_str())
        .bind(params_json)
        .bind(record.state.as_str())
        .bind(record.command.expires_at.map(|at| at.timestamp_millis()))
        .bind(util::ms_to_i64(record.created_at_ms))
        .bind(record.delivered_at_ms.map(util::ms_to_i64))
        .bind(record.ack_deadline_ms.map(util::ms_to_i64))
        .bind(record.acked_at_ms.map(util::ms_to_i64))
        .bind(&record.detail)
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to insert command: {error}")))?;

        Ok(())
    }

    pub async fn get_command(&self, command_id: &str) -> Result<Option<CommandRecord>, DomainError> {
        let row = sqlx::query_as::<_, CommandRow>(&format!(
            "SELECT {COMMAND_COLUMNS} FROM commands WHERE command_id = ? LIMIT 1"
        ))
        .bind(command_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to get command: {error}")))?;

        row.map(map_command_row).transpose()
    }

    /// All queued commands for a device in enqueue order, expired ones
    /// excluded. The caller transitions them to delivered.
    pub async fn queued_commands(&self, device_id: &str) -> Result<Vec<CommandRecord>, DomainError> {
        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            "SELECT {COMMAND_COLUMNS} FROM commands \
             WHERE device_id = ? AND state = 'queued' ORDER BY created_at_ms ASC, command_id ASC"
        ))
        .bind(device_id)
        .fetch_all(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to list queued commands: {error}")))?;

        rows.into_iter().map(map_command_row).collect()
    }

    /// queued -> delivered with an acknowledgment deadline. Guarded on the
    /// current state so racing poll and push paths hand out each command
    /// only once per delivery round.
    pub async fn command_mark_delivered(
        &self,
        command_id: &str,
        now_ms: u64,
        ack_deadline_ms: u64,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE commands SET state = 'delivered', delivered_at_ms = ?, ack_deadline_ms = ? \
             WHERE command_id = ? AND state = 'queued'",
        )
        .bind(util::ms_to_i64(now_ms))
        .bind(util::ms_to_i64(ack_deadline_ms))
        .bind(command_id)
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to mark delivered: {error}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Applies a device acknowledgment. Accepted from `delivered` and also
    /// from `queued`: an ack that arrives after a timeout already requeued
    /// the command is a harmless duplicate and still lands. Terminal states
    /// are left untouched.
    pub async fn command_acknowledge(
        &self,
        command_id: &str,
        status: AckStatus,
        detail: Option<&str>,
        now_ms: u64,
    ) -> Result<Option<CommandRecord>, DomainError> {
        let next_state = match status {
            AckStatus::Acknowledged => CommandState::Acknowledged,
            AckStatus::Failed => CommandState::Failed,
        };

        sqlx::query(
            "UPDATE commands SET state = ?, acked_at_ms = ?, detail = ? \
             WHERE command_id = ? AND state IN ('queued', 'delivered')",
        )
        .bind(next_state.as_str())
        .bind(util::ms_to_i64(now_ms))
        .bind(detail)
        .bind(command_id)
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to acknowledge command: {error}")))?;

        self.get_command(command_id).await
    }

    /// delivered commands whose ack deadline passed go back to queued for
    /// redelivery on the next poll.
    pub async fn commands_requeue_overdue(&self, now_ms: u64) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE commands SET state = 'queued', delivered_at_ms = NULL, ack_deadline_ms = NULL \
             WHERE state = 'delivered' AND ack_deadline_ms IS NOT NULL AND ack_deadline_ms <= ?",
        )
        .bind(util::ms_to_i64(now_ms))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to requeue overdue: {error}")))?;
        Ok(result.rows_affected())
    }

    /// Anything non-terminal past its expiry deadline becomes expired; it
    /// is never delivered or retried again.
    pub async fn commands_expire_overdue(&self, now_ms: u64) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE commands SET state = 'expired' \
             WHERE state IN ('queued', 'delivered') AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?",
        )
        .bind(util::ms_to_i64(now_ms))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to expire overdue: {error}")))?;
        Ok(result.rows_affected())
    }

    pub async fn count_pending_commands(&self, device_id: &str) -> Result<u64, DomainError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM commands WHERE device_id = ? AND state IN ('queued', 'delivered')",
        )
        .bind(device_id)
        .fetch_one(self.pool())
        .await
        .map_err(|error| {
            DomainError::Storage(format!("failed to count pending commands: {error}"))
        })?;
        Ok(util::i64_to_u64(count))
    }

    pub async fn count_commands(&self) -> Result<u64, DomainError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM commands")
            .fetch_one(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to count commands: {error}")))?;
        Ok(util::i64_to_u64(count))
    }

    // Edge-side command history (the inbox dedup set).

    /// Atomic first-execution claim for a command id. True on first sight.
    pub async fn history_insert_if_absent(
        &self,
        command_id: &str,
        status: AckStatus,
        detail: Option<&str>,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "INSERT INTO command_history(command_id, status, detail, executed_at_ms) \
             VALUES(?, ?, ?, ?) ON CONFLICT(command_id) DO NOTHING",
        )
        .bind(command_id)
        .bind(status.as_str())
        .bind(detail)
        .bind(util::ms_to_i64(util::now_unix_ms()))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to record history: {error}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn history_update(
        &self,
        command_id: &str,
        status: AckStatus,
        detail: Option<&str>,
    ) -> Result<(), DomainError> {
        sqlx::query("UPDATE command_history SET status = ?, detail = ? WHERE command_id = ?")
            .bind(status.as_str())
            .bind(detail)
            .bind(command_id)
            .execute(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to update history: {error}")))?;
        Ok(())
    }

    pub async fn history_get(
        &self,
        command_id: &str,
    ) -> Result<Option<(AckStatus, Option<String>)>, DomainError> {
        let row = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT status, detail FROM command_history WHERE command_id = ? LIMIT 1",
        )
        .bind(command_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to get history: {error}")))?;

        row.map(|(status, detail)| {
            let status = AckStatus::parse(&status).map_err(DomainError::Storage)?;
            Ok((status, detail))
        })
        .transpose()
    }

    /// Bounds the dedup set to the most recent `limit` entries.
    pub async fn history_trim(&self, limit: usize) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM command_history WHERE command_id IN ( \
               SELECT command_id FROM command_history \
               ORDER BY executed_at_ms DESC LIMIT -1 OFFSET ?)",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to trim history: {error}")))?;
        Ok(result.rows_affected())
    }
}

fn map_command_row(row: CommandRow) -> Result<CommandRecord, DomainError> {
    let (
        command_id,
        device_id,
        action,
        params_json,
        state,
        expires_at_ms,
        created_at_ms,
        delivered_at_ms,
        ack_deadline_ms,
        acked_at_ms,
        detail,
    ) = row;

    let action = CommandAction::parse(&action).map_err(DomainError::Storage)?;
    let state = CommandState::parse(&state).map_err(DomainError::Storage)?;
    let params = util::json_text_to_value(&params_json).map_err(DomainError::Storage)?;
    let expires_at = expires_at_ms
        .map(|ms| {
            chrono::DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| DomainError::Storage(format!("invalid expiry timestamp: {ms}")))
        })
        .transpose()?;

    Ok(CommandRecord {
        command: Command {
            command_id,
            device_id,
            action,
            params,
            expires_at,
        },
        state,
        created_at_ms: util::i64_to_u64(created_at_ms),
        delivered_at_ms: delivered_at_ms.map(util::i64_to_u64),
        ack_deadline_ms: ack_deadline_ms.map(util::i64_to_u64),
        acked_at_ms: acked_at_ms.map(util::i64_to_u64),
        detail,
    })
}
