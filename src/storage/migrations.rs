use sqlx::{Executor, SqlitePool};

use crate::domain::error::DomainError;

pub async fn migrate(pool: &SqlitePool) -> Result<(), DomainError> {
    // synchronous=FULL: outbox mutations must be crash-durable before the
    // call returns; the cloud tables inherit the same setting.
    let migration = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;

    CREATE TABLE IF NOT EXISTS outbox (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        alert_id TEXT NOT NULL UNIQUE,
        device_id TEXT NOT NULL,
        event_json TEXT NOT NULL,
        event_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        payload_bytes INTEGER NOT NULL,
        state TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_outbox_state_seq ON outbox(state, seq ASC);

    CREATE TABLE IF NOT EXISTS outbox_dead_letters (
        alert_id TEXT PRIMARY KEY NOT NULL,
        device_id TEXT NOT NULL,
        event_json TEXT NOT NULL,
        reason TEXT NOT NULL,
        failed_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS command_history (
        command_id TEXT PRIMARY KEY NOT NULL,
        status TEXT NOT NULL,
        detail TEXT,
        executed_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_command_history_executed ON command_history(executed_at_ms DESC);

    CREATE TABLE IF NOT EXISTS alerts (
        alert_id TEXT PRIMARY KEY NOT NULL,
        device_id TEXT NOT NULL,
        site_id TEXT,
        camera_id TEXT NOT NULL,
        zone TEXT,
        event_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        coordinates_json TEXT,
        event_ts_ms INTEGER NOT NULL,
        snapshot BLOB,
        extra_json TEXT NOT NULL,
        received_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_alerts_device_received ON alerts(device_id, received_at_ms DESC);
    CREATE INDEX IF NOT EXISTS idx_alerts_received ON alerts(received_at_ms DESC);

    CREATE TABLE IF NOT EXISTS commands (
        command_id TEXT PRIMARY KEY NOT NULL,
        device_id TEXT NOT NULL,
        action TEXT NOT NULL,
        params_json TEXT NOT NULL,
        state TEXT NOT NULL,
        expires_at_ms INTEGER,
        created_at_ms INTEGER NOT NULL,
        delivered_at_ms INTEGER,
        ack_deadline_ms INTEGER,
        acked_at_ms INTEGER,
        detail TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_commands_device_state ON commands(device_id, state, created_at_ms ASC);
    CREATE INDEX IF NOT EXISTS idx_commands_deadline ON commands(state, ack_deadline_ms ASC);

    CREATE TABLE IF NOT EXISTS device_sessions (
        device_id TEXT PRIMARY KEY NOT NULL,
        last_seen_ms INTEGER NOT NULL,
        connection_mode TEXT NOT NULL
    );
    "#;

    pool.execute(migration)
        .await
        .map_err(|error| DomainError::Storage(format!("migration failed: {error}")))?;

    Ok(())
}
