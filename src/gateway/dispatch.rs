use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        error::DomainError,
        models::{AckStatus, Command, CommandAction, CommandRecord, CommandState, ConnectionMode},
    },
    gateway::session::SessionTracker,
    protocol::EnqueueCommandRequest,
    storage::{SqliteStore, now_unix_ms},
};

const PUSH_CHANNEL_CAPACITY: usize = 32;

/// Cloud-side command dispatcher. Commands are durable rows; devices with
/// an open push channel also get an in-memory sender registered here.
/// Per-device isolation comes from keyed rows and the keyed registry; no
/// process-wide lock is held across await points on different devices.
#[derive(Clone)]
pub struct CommandDispatch {
    store: SqliteStore,
    sessions: SessionTracker,
    push: Arc<RwLock<HashMap<String, mpsc::Sender<Command>>>>,
    ack_timeout: Duration,
}

impl CommandDispatch {
    #[must_use]
    pub fn new(store: SqliteStore, sessions: SessionTracker, ack_timeout: Duration) -> Self {
        Self {
            store,
            sessions,
            push: Arc::new(RwLock::new(HashMap::new())),
            ack_timeout,
        }
    }

    /// Queues a command for a device. A command already past `expires_at`
    /// is stored terminal-expired and surfaced immediately, never
    /// delivered. If the device holds an open push channel the command is
    /// delivered right away with the usual ack deadline.
    pub async fn enqueue(
        &self,
        request: EnqueueCommandRequest,
    ) -> Result<CommandRecord, DomainError> {
        if request.device_id.trim().is_empty() {
            return Err(DomainError::Validation("device_id is required".to_owned()));
        }
        let action = CommandAction::parse(&request.action).map_err(DomainError::Validation)?;

        let command = Command {
            command_id: format!("cmd-{}", uuid::Uuid::new_v4()),
            device_id: request.device_id,
            action,
            params: request.params,
            expires_at: request.expires_at,
        };

        let now_ms = now_unix_ms();
        let state = if command.is_expired_at(Utc::now()) {
            CommandState::Expired
        } else {
            CommandState::Queued
        };

        let record = CommandRecord {
            command,
            state,
            created_at_ms: now_ms,
            delivered_at_ms: None,
            ack_deadline_ms: None,
            acked_at_ms: None,
            detail: None,
        };
        self.store.command_insert(&record).await?;

        if record.state == CommandState::Expired {
            info!(
                command_id = %record.command.command_id,
                device_id = %record.command.device_id,
                "command expired before it could be queued"
            );
            return Ok(record);
        }

        self.try_push(&record.command).await?;
        self.store
            .get_command(&record.command.command_id)
            .await?
            .ok_or_else(|| {
                DomainError::Storage(format!(
                    "command vanished after insert: {}",
                    record.command.command_id
                ))
            })
    }

    /// Pull path: returns every queued command for the device, transitioned
    /// to delivered with an ack deadline. Expired commands are never
    /// returned.
    pub async fn poll(&self, device_id: &str) -> Result<Vec<Command>, DomainError> {
        if device_id.trim().is_empty() {
            return Err(DomainError::Validation("device_id is required".to_owned()));
        }

        self.sessions
            .record_contact(device_id, ConnectionMode::Polling)
            .await?;

        let now_ms = now_unix_ms();
        self.store.commands_expire_overdue(now_ms).await?;

        let queued = self.store.queued_commands(device_id).await?;
        let deadline_ms = now_ms + self.ack_timeout.as_millis() as u64;

        let mut delivered = Vec::with_capacity(queued.len());
        for record in queued {
            // The state guard loses the race gracefully when push delivery
            // or a concurrent poll already handed this command out.
            if self
                .store
                .command_mark_delivered(&record.command.command_id, now_ms, deadline_ms)
                .await?
            {
                delivered.push(record.command);
            }
        }

        debug!(device_id, count = delivered.len(), "poll served");
        Ok(delivered)
    }

    /// Applies a device acknowledgment. A late ack that arrives after the
    /// timeout requeued the command still lands; the retry it races with
    /// is a harmless duplicate on the edge side.
    pub async fn acknowledge(
        &self,
        command_id: &str,
        status: AckStatus,
        detail: Option<String>,
        mode: ConnectionMode,
    ) -> Result<CommandRecord, DomainError> {
        let record = self
            .store
            .command_acknowledge(command_id, status, detail.as_deref(), now_unix_ms())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("command not found: {command_id}")))?;

        if record.state == CommandState::Expired {
            return Err(DomainError::Expired(format!(
                "command already expired: {command_id}"
            )));
        }

        self.sessions
            .record_contact(&record.command.device_id, mode)
            .await?;
        Ok(record)
    }

    pub async fn get(&self, command_id: &str) -> Result<CommandRecord, DomainError> {
        self.store
            .get_command(command_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("command not found: {command_id}")))
    }

    /// Registers an open push channel for a device and flushes anything
    /// already queued through it. The returned sender identifies this
    /// registration; teardown must hand it back so a connection replaced
    /// by a reconnect cannot tear down its successor.
    pub async fn register_push(
        &self,
        device_id: &str,
    ) -> Result<(mpsc::Sender<Command>, mpsc::Receiver<Command>), DomainError> {
        let (sender, receiver) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        self.push
            .write()
            .await
            .insert(device_id.to_owned(), sender.clone());
        self.sessions
            .record_contact(device_id, ConnectionMode::Push)
            .await?;

        let now_ms = now_unix_ms();
        self.store.commands_expire_overdue(now_ms).await?;
        for record in self.store.queued_commands(device_id).await? {
            self.try_push(&record.command).await?;
        }

        Ok((sender, receiver))
    }

    /// Removes the registry entry only if it still belongs to the caller's
    /// registration. A stale teardown after a reconnect leaves the newer
    /// channel and its push session mode untouched.
    pub async fn unregister_push(
        &self,
        device_id: &str,
        sender: &mpsc::Sender<Command>,
    ) -> Result<(), DomainError> {
        {
            let mut registry = self.push.write().await;
            match registry.get(device_id) {
                Some(current) if current.same_channel(sender) => {
                    registry.remove(device_id);
                }
                _ => return Ok(()),
            }
        }
        // The device falls back to polling until it reconnects.
        self.sessions
            .record_contact(device_id, ConnectionMode::Polling)
            .await
    }

    pub async fn record_push_contact(&self, device_id: &str) -> Result<(), DomainError> {
        self.sessions
            .record_contact(device_id, ConnectionMode::Push)
            .await
    }

    /// Periodic sweep: delivered-but-unacknowledged commands past their
    /// deadline go back to queued; anything past `expires_at` becomes
    /// terminal expired.
    pub async fn sweep(&self) -> Result<(u64, u64), DomainError> {
        let now_ms = now_unix_ms();
        let requeued = self.store.commands_requeue_overdue(now_ms).await?;
        let expired = self.store.commands_expire_overdue(now_ms).await?;
        if requeued > 0 || expired > 0 {
            info!(requeued, expired, "command sweep");
        }
        Ok((requeued, expired))
    }

    /// Sends the command over the device's push channel if one is open and
    /// marks it delivered. The send happens before the state transition so
    /// a dead channel leaves the command queued for the next poll.
    async fn try_push(&self, command: &Command) -> Result<(), DomainError> {
        let sender = {
            let registry = self.push.read().await;
            registry.get(&command.device_id).cloned()
        };
        let Some(sender) = sender else {
            return Ok(());
        };

        if sender.try_send(command.clone()).is_err() {
            warn!(
                command_id = %command.command_id,
                device_id = %command.device_id,
                "push channel unavailable, leaving command queued"
            );
            return Ok(());
        }

        let now_ms = now_unix_ms();
        let deadline_ms = now_ms + self.ack_timeout.as_millis() as u64;
        self.store
            .command_mark_delivered(&command.command_id, now_ms, deadline_ms)
            .await?;
        debug!(command_id = %command.command_id, "command pushed");
        Ok(())
    }
}
