use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    domain::{
        error::DomainError,
        models::{AckStatus, Command},
    },
    storage::SqliteStore,
};

/// Device-side command execution seam. Implementations perform the actual
/// side effect (restart, config reload, ...) and report an optional detail.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<Option<String>, String>> + Send;
}

/// Stock executor for devices without a wired-in handler. Side effects
/// beyond logging are the owner's responsibility; healthcheck is answered
/// inline.
pub struct DefaultExecutor;

impl CommandExecutor for DefaultExecutor {
    async fn execute(&self, command: &Command) -> Result<Option<String>, String> {
        use crate::domain::models::CommandAction;

        tracing::info!(
            "executing command {} action={}",
            command.command_id,
            command.action.as_str()
        );
        match command.action {
            CommandAction::Healthcheck => Ok(Some("ok".to_owned())),
            CommandAction::Restart => Ok(Some("restart scheduled".to_owned())),
            CommandAction::UpdateConfig => Ok(Some("config update applied".to_owned())),
            CommandAction::Custom => Ok(None),
        }
    }
}

/// Receives commands from either channel and enforces at-most-one
/// execution per command id. Redelivered commands re-emit the recorded
/// outcome instead of running again.
#[derive(Clone)]
pub struct CommandInbox {
    store: SqliteStore,
    history_limit: usize,
}

impl CommandInbox {
    #[must_use]
    pub fn new(store: SqliteStore, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    /// Handles one incoming command and returns the ack to send back.
    pub async fn receive<E: CommandExecutor>(
        &self,
        executor: &E,
        command: &Command,
    ) -> Result<(AckStatus, Option<String>), DomainError> {
        if command.is_expired_at(Utc::now()) {
            debug!("command {} expired before execution", command.command_id);
            return Ok((
                AckStatus::Failed,
                Some("expired before execution".to_owned()),
            ));
        }

        // Claim the id before executing. Losing the claim means this is a
        // redelivery; answer with the recorded outcome.
        let first_sight = self
            .store
            .history_insert_if_absent(&command.command_id, AckStatus::Failed, Some("in progress"))
            .await?;
        if !first_sight {
            let (status, detail) = self
                .store
                .history_get(&command.command_id)
                .await?
                .unwrap_or((AckStatus::Failed, Some("history lost".to_owned())));
            debug!(
                "command {} already executed, re-acking {}",
                command.command_id,
                status.as_str()
            );
            return Ok((status, detail));
        }

        let (status, detail) = match executor.execute(command).await {
            Ok(detail) => (AckStatus::Acknowledged, detail),
            Err(reason) => {
                warn!("command {} failed: {reason}", command.command_id);
                (AckStatus::Failed, Some(reason))
            }
        };

        self.store
            .history_update(&command.command_id, status, detail.as_deref())
            .await?;
        self.store.history_trim(self.history_limit).await?;

        Ok((status, detail))
    }
}
