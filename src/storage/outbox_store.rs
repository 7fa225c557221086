use crate::{
    domain::{
        error::DomainError,
        models::{AlertEvent, OutboxEntry, OutboxState},
    },
    storage::{SqliteStore, util},
};

type OutboxRow = (String, String, String, i64, i64);

/// A dead-lettered alert: terminal, removed from the live queue, kept for
/// manual inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: AlertEvent,
    pub reason: String,
    pub failed_at_ms: u64,
}

impl SqliteStore {
    /// Durable insert of a freshly produced alert. The caller decides
    /// capacity policy before this point.
    pub async fn outbox_insert(&self, event: &AlertEvent) -> Result<(), DomainError> {
        let event_json = util::to_json_text(event).map_err(DomainError::Storage)?;
        let payload_bytes = i64::try_from(event_json.len()).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO outbox(alert_id, device_id, event_json, event_type, confidence, payload_bytes, state, attempts, created_at_ms) \
             VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&event.alert_id)
        .bind(&event.device_id)
        .bind(&event_json)
        .bind(event.event_type.as_str())
        .bind(event.confidence)
        .bind(payload_bytes)
        .bind(OutboxState::Pending.as_str())
        .bind(util::ms_to_i64(util::now_unix_ms()))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to insert outbox entry: {error}")))?;

        Ok(())
    }

    pub async fn outbox_len(&self) -> Result<u64, DomainError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM outbox")
            .fetch_one(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to count outbox: {error}")))?;
        Ok(util::i64_to_u64(count))
    }

    /// Picks the eviction victim under capacity pressure: oldest among the
    /// lowest-confidence pending entries, never a fire alert.
    pub async fn outbox_drop_candidate(&self) -> Result<Option<String>, DomainError> {
        sqlx::query_scalar::<_, String>(
            "SELECT alert_id FROM outbox \
             WHERE state = 'pending' AND event_type != 'fire' \
             ORDER BY confidence ASC, seq ASC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to pick drop candidate: {error}")))
    }

    /// Non-destructive read of pending entries in enqueue order up to the
    /// byte budget. Always yields at least one entry when any is pending,
    /// so a single oversize snapshot still gets delivered.
    pub async fn outbox_peek_batch(&self, max_bytes: usize) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT alert_id, event_json, state, attempts, created_at_ms \
             FROM outbox WHERE state = 'pending' ORDER BY seq ASC LIMIT 64",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to peek outbox: {error}")))?;

        let mut batch = Vec::new();
        let mut budget_used = 0usize;
        for row in rows {
            let entry = map_outbox_row(row)?;
            let entry_bytes = entry.event.snapshot_len().max(1);
            if !batch.is_empty() && budget_used + entry_bytes > max_bytes {
                break;
            }
            budget_used += entry_bytes;
            batch.push(entry);
        }
        Ok(batch)
    }

    /// Transitions pending -> in_flight for a delivery attempt. Returns
    /// false when the entry is gone or already in flight.
    pub async fn outbox_mark_in_flight(&self, alert_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE outbox SET state = 'in_flight', attempts = attempts + 1 \
             WHERE alert_id = ? AND state = 'pending'",
        )
        .bind(alert_id)
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to mark in flight: {error}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes a confirmed-delivered entry. Idempotent.
    pub async fn outbox_acknowledge(&self, alert_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM outbox WHERE alert_id = ?")
            .bind(alert_id)
            .execute(self.pool())
            .await
            .map_err(|error| {
                DomainError::Storage(format!("failed to acknowledge outbox entry: {error}"))
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns an in-flight entry to pending after a failed attempt. The
    /// original seq is untouched, so the entry keeps its queue position.
    pub async fn outbox_requeue(&self, alert_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE outbox SET state = 'pending' WHERE alert_id = ? AND state = 'in_flight'",
        )
        .bind(alert_id)
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to requeue outbox entry: {error}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Moves an entry to the dead-letter table. Terminal: it will not be
    /// retried further.
    pub async fn outbox_dead_letter(&self, alert_id: &str, reason: &str) -> Result<bool, DomainError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| DomainError::Storage(format!("failed to start tx: {error}")))?;

        let moved = sqlx::query(
            "INSERT OR IGNORE INTO outbox_dead_letters(alert_id, device_id, event_json, reason, failed_at_ms) \
             SELECT alert_id, device_id, event_json, ?, ? FROM outbox WHERE alert_id = ?",
        )
        .bind(reason)
        .bind(util::ms_to_i64(util::now_unix_ms()))
        .bind(alert_id)
        .execute(&mut *tx)
        .await
        .map_err(|error| DomainError::Storage(format!("failed to dead-letter entry: {error}")))?;

        sqlx::query("DELETE FROM outbox WHERE alert_id = ?")
            .bind(alert_id)
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                DomainError::Storage(format!("failed to remove dead-lettered entry: {error}"))
            })?;

        tx.commit()
            .await
            .map_err(|error| DomainError::Storage(format!("failed to commit tx: {error}")))?;
        Ok(moved.rows_affected() > 0)
    }

    pub async fn outbox_delete(&self, alert_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM outbox WHERE alert_id = ?")
            .bind(alert_id)
            .execute(self.pool())
            .await
            .map_err(|error| {
                DomainError::Storage(format!("failed to delete outbox entry: {error}"))
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Crash recovery: any attempt that was cut short by a restart goes
    /// back to pending so it is retried.
    pub async fn outbox_recover_in_flight(&self) -> Result<u64, DomainError> {
        let result = sqlx::query("UPDATE outbox SET state = 'pending' WHERE state = 'in_flight'")
            .execute(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to recover outbox: {error}")))?;
        Ok(result.rows_affected())
    }

    pub async fn outbox_get(&self, alert_id: &str) -> Result<Option<OutboxEntry>, DomainError> {
        let row = sqlx::query_as::<_, OutboxRow>(
            "SELECT alert_id, event_json, state, attempts, created_at_ms \
             FROM outbox WHERE alert_id = ? LIMIT 1",
        )
        .bind(alert_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to get outbox entry: {error}")))?;

        row.map(map_outbox_row).transpose()
    }

    pub async fn outbox_dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT event_json, reason, failed_at_ms \
             FROM outbox_dead_letters ORDER BY failed_at_ms DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to list dead letters: {error}")))?;

        rows.into_iter()
            .map(|(event_json, reason, failed_at_ms)| {
                let event = util::from_json_text::<AlertEvent>(&event_json)
                    .map_err(DomainError::Storage)?;
                Ok(DeadLetter {
                    event,
                    reason,
                    failed_at_ms: util::i64_to_u64(failed_at_ms),
                })
            })
            .collect()
    }
}

fn map_outbox_row(row: OutboxRow) -> Result<OutboxEntry, DomainError> {
    let (_alert_id, event_json, state, attempts, created_at_ms) = row;
    let event = util::from_json_text::<AlertEvent>(&event_json).map_err(DomainError::Storage)?;
    let state = OutboxState::parse(&state).map_err(DomainError::Storage)?;

    Ok(OutboxEntry {
        event,
        state,
        attempts: u32::try_from(attempts).unwrap_or(0),
        created_at_ms: util::i64_to_u64(created_at_ms),
    })
}
