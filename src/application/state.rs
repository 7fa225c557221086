use std::{sync::Arc, time::Instant};

use serde_json::{Value, json};

use crate::{
    application::config::RuntimeConfig,
    domain::{
        error::DomainError,
        models::{AckStatus, AlertEvent, AlertRecord, Command, CommandRecord, ConnectionMode, DeviceSession},
    },
    gateway::{
        dispatch::CommandDispatch,
        ingress::IngressGateway,
        notify::{self, NotificationSender},
        session::SessionTracker,
    },
    protocol::{EnqueueCommandRequest, SubmitAlertResponse},
    storage::{SqliteStore, now_unix_ms},
};

/// Cloud process state: the store plus the three gateway components, all
/// sharing the same SQLite pool. Cheap to clone.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<InnerState>,
}

struct InnerState {
    config: RuntimeConfig,
    store: SqliteStore,
    sessions: SessionTracker,
    ingress: IngressGateway,
    dispatch: CommandDispatch,
    started_at: Instant,
}

impl SharedState {
    pub async fn new(config: RuntimeConfig) -> Result<Self, DomainError> {
        let (sender, receiver) = notify::channel(config.notify_buffer);
        let _ = notify::spawn_drain(receiver);
        Self::with_notifier(config, sender).await
    }

    /// Wires an explicit notification sender; tests use this to observe
    /// what the ingress emits.
    pub async fn with_notifier(
        config: RuntimeConfig,
        notifier: NotificationSender,
    ) -> Result<Self, DomainError> {
        let store = SqliteStore::connect(&config.db_path).await?;
        let sessions = SessionTracker::new(store.clone(), config.offline_threshold);
        let ingress = IngressGateway::new(
            store.clone(),
            sessions.clone(),
            notifier,
            config.max_snapshot_bytes,
        );
        let dispatch = CommandDispatch::new(store.clone(), sessions.clone(), config.ack_timeout);

        Ok(Self {
            inner: Arc::new(InnerState {
                config,
                store,
                sessions,
                ingress,
                dispatch,
                started_at: Instant::now(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn dispatch(&self) -> &CommandDispatch {
        &self.inner.dispatch
    }

    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.inner.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn auth_mode_label(&self) -> &'static str {
        self.inner.config.auth_mode.label()
    }

    pub async fn submit_alert(&self, event: AlertEvent) -> Result<SubmitAlertResponse, DomainError> {
        self.inner.ingress.submit(event).await
    }

    pub async fn list_alerts(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, DomainError> {
        self.inner.store.list_alerts(device_id, limit).await
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>, DomainError> {
        self.inner.store.get_alert(alert_id).await
    }

    pub async fn enqueue_command(
        &self,
        request: EnqueueCommandRequest,
    ) -> Result<CommandRecord, DomainError> {
        self.inner.dispatch.enqueue(request).await
    }

    pub async fn poll_commands(&self, device_id: &str) -> Result<Vec<Command>, DomainError> {
        self.inner.dispatch.poll(device_id).await
    }

    pub async fn acknowledge_command(
        &self,
        command_id: &str,
        status: AckStatus,
        detail: Option<String>,
        mode: ConnectionMode,
    ) -> Result<CommandRecord, DomainError> {
        self.inner.dispatch.acknowledge(command_id, status, detail, mode).await
    }

    pub async fn get_command(&self, command_id: &str) -> Result<CommandRecord, DomainError> {
        self.inner.dispatch.get(command_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<DeviceSession>, DomainError> {
        self.inner.sessions.list().await
    }

    pub async fn get_session(&self, device_id: &str) -> Result<Option<DeviceSession>, DomainError> {
        self.inner.sessions.get(device_id).await
    }

    pub async fn device_is_offline(&self, device_id: &str) -> Result<bool, DomainError> {
        self.inner.sessions.is_offline(device_id).await
    }

    pub async fn sweep_commands(&self) -> Result<(u64, u64), DomainError> {
        self.inner.dispatch.sweep().await
    }

    pub async fn prune_alerts(&self) -> Result<u64, DomainError> {
        self.inner
            .store
            .prune_alerts(self.inner.config.alert_retention_ms)
            .await
    }

    pub async fn health_payload(&self) -> Result<Value, DomainError> {
        let alerts = self.inner.store.count_alerts().await?;
        let commands = self.inner.store.count_commands().await?;
        let sessions = self.inner.store.list_sessions().await?;

        Ok(json!({
            "ok": true,
            "ts": now_unix_ms(),
            "version": self.config().runtime_version,
            "authMode": self.auth_mode_label(),
            "uptimeMs": self.uptime_ms(),
            "alerts": alerts,
            "commands": commands,
            "devices": sessions.len(),
        }))
    }
}
