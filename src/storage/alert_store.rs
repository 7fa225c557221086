use crate::{
    domain::{
        error::DomainError,
        models::{AlertEvent, AlertRecord, EventType, Region},
    },
    storage::{SqliteStore, util},
};

type AlertRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    f64,
    Option<String>,
    i64,
    Option<Vec<u8>>,
    String,
    i64,
);

impl SqliteStore {
    /// Atomic first-sight insert keyed on `alert_id`. Returns true only the
    /// first time a given id is seen; retransmissions leave the stored
    /// record untouched. This is the idempotency check-and-set.
    pub async fn alert_insert_if_absent(&self, event: &AlertEvent) -> Result<bool, DomainError> {
        let coordinates_json = event
            .coordinates
            .as_ref()
            .map(util::to_json_text)
            .transpose()
            .map_err(DomainError::Storage)?;
        let extra_json = util::value_to_json_text(&event.extra).map_err(DomainError::Storage)?;

        let result = sqlx::query(
            "INSERT INTO alerts(alert_id, device_id, site_id, camera_id, zone, event_type, confidence, coordinates_json, event_ts_ms, snapshot, extra_json, received_at_ms) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(alert_id) DO NOTHING",
        )
        .bind(&event.alert_id)
        .bind(&event.device_id)
        .bind(&event.site_id)
        .bind(&event.camera_id)
        .bind(&event.zone)
        .bind(event.event_type.as_str())
        .bind(event.confidence)
        .bind(coordinates_json)
        .bind(event.timestamp.timestamp_millis())
        .bind(&event.snapshot)
        .bind(extra_json)
        .bind(util::ms_to_i64(util::now_unix_ms()))
        .execute(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to insert alert: {error}")))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>, DomainError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "SELECT alert_id, device_id, site_id, camera_id, zone, event_type, confidence, coordinates_json, event_ts_ms, snapshot, extra_json, received_at_ms \
             FROM alerts WHERE alert_id = ? LIMIT 1",
        )
        .bind(alert_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| DomainError::Storage(format!("failed to get alert: {error}")))?;

        row.map(map_alert_row).transpose()
    }

    pub async fn list_alerts(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = if let Some(device_id) = device_id {
            sqlx::query_as::<_, AlertRow>(
                "SELECT alert_id, device_id, site_id, camera_id, zone, event_type, confidence, coordinates_json, event_ts_ms, snapshot, extra_json, received_at_ms \
                 FROM alerts WHERE device_id = ? ORDER BY received_at_ms DESC LIMIT ?",
            )
            .bind(device_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query_as::<_, AlertRow>(
                "SELECT alert_id, device_id, site_id, camera_id, zone, event_type, confidence, coordinates_json, event_ts_ms, snapshot, extra_json, received_at_ms \
                 FROM alerts ORDER BY received_at_ms DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.pool())
            .await
        }
        .map_err(|error| DomainError::Storage(format!("failed to list alerts: {error}")))?;

        rows.into_iter().map(map_alert_row).collect()
    }

    pub async fn count_alerts(&self) -> Result<u64, DomainError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM alerts")
            .fetch_one(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to count alerts: {error}")))?;
        Ok(util::i64_to_u64(count))
    }

    /// Drops alert records older than the retention horizon. Retention of 0
    /// keeps everything; anything >= the configured dedup window preserves
    /// idempotency for plausible retry durations.
    pub async fn prune_alerts(&self, retention_ms: u64) -> Result<u64, DomainError> {
        if retention_ms == 0 {
            return Ok(0);
        }
        let cutoff = util::now_unix_ms().saturating_sub(retention_ms);
        let result = sqlx::query("DELETE FROM alerts WHERE received_at_ms < ?")
            .bind(util::ms_to_i64(cutoff))
            .execute(self.pool())
            .await
            .map_err(|error| DomainError::Storage(format!("failed to prune alerts: {error}")))?;
        Ok(result.rows_affected())
    }
}

fn map_alert_row(row: AlertRow) -> Result<AlertRecord, DomainError> {
    let (
        alert_id,
        device_id,
        site_id,
        camera_id,
        zone,
        event_type,
        confidence,
        coordinates_json,
        event_ts_ms,
        snapshot,
        extra_json,
        received_at_ms,
    ) = row;

    let event_type = EventType::parse(&event_type).map_err(DomainError::Storage)?;
    let coordinates = coordinates_json
        .as_deref()
        .map(util::from_json_text::<Region>)
        .transpose()
        .map_err(DomainError::Storage)?;
    let extra = util::json_text_to_value(&extra_json).map_err(DomainError::Storage)?;
    let timestamp = chrono::DateTime::from_timestamp_millis(event_ts_ms)
        .ok_or_else(|| DomainError::Storage(format!("invalid event timestamp: {event_ts_ms}")))?;

    Ok(AlertRecord {
        event: AlertEvent {
            alert_id,
            device_id,
            site_id,
            camera_id,
            zone,
            event_type,
            confidence,
            coordinates,
            timestamp,
            snapshot,
            extra,
        },
        received_at_ms: util::i64_to_u64(received_at_ms),
    })
}
