use std::sync::Arc;

use tokio::sync::Notify;
use tracing::warn;

use crate::{
    domain::{
        error::DomainError,
        models::{AlertEvent, OutboxEntry},
    },
    storage::{DeadLetter, SqliteStore},
};

/// Durable FIFO between the local producer and the delivery client. Entries
/// survive restart; completed deliveries are deleted, not flagged.
#[derive(Clone)]
pub struct OutboxQueue {
    store: SqliteStore,
    capacity: usize,
    wakeup: Arc<Notify>,
}

impl OutboxQueue {
    #[must_use]
    pub fn new(store: SqliteStore, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Appends an event, evicting under pressure. At capacity the lowest
    /// confidence pending non-fire entry is dropped to make room; if no
    /// entry qualifies the new event is refused.
    pub async fn enqueue(&self, event: &AlertEvent) -> Result<(), DomainError> {
        let depth = self.store.outbox_len().await?;
        if depth >= self.capacity as u64 {
            match self.store.outbox_drop_candidate().await? {
                Some(victim) => {
                    self.store.outbox_delete(&victim).await?;
                    warn!(
                        "outbox full ({depth}/{}), dropped alert {victim} to admit {}",
                        self.capacity, event.alert_id
                    );
                }
                None => {
                    return Err(DomainError::Capacity(format!(
                        "outbox full ({depth}/{}) and nothing is droppable",
                        self.capacity
                    )));
                }
            }
        }

        self.store.outbox_insert(event).await?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Oldest-first pending entries within a byte budget, at least one.
    pub async fn peek_batch(&self, max_bytes: usize) -> Result<Vec<OutboxEntry>, DomainError> {
        self.store.outbox_peek_batch(max_bytes).await
    }

    pub async fn mark_in_flight(&self, alert_id: &str) -> Result<bool, DomainError> {
        self.store.outbox_mark_in_flight(alert_id).await
    }

    pub async fn acknowledge(&self, alert_id: &str) -> Result<bool, DomainError> {
        self.store.outbox_acknowledge(alert_id).await
    }

    pub async fn requeue(&self, alert_id: &str) -> Result<bool, DomainError> {
        self.store.outbox_requeue(alert_id).await
    }

    pub async fn dead_letter(&self, alert_id: &str, reason: &str) -> Result<bool, DomainError> {
        self.store.outbox_dead_letter(alert_id, reason).await
    }

    /// Puts entries stranded in flight by a crash back in line. Call once
    /// at startup, before the delivery loop begins.
    pub async fn recover(&self) -> Result<u64, DomainError> {
        let recovered = self.store.outbox_recover_in_flight().await?;
        if recovered > 0 {
            warn!("recovered {recovered} in-flight outbox entries after restart");
            self.wakeup.notify_one();
        }
        Ok(recovered)
    }

    pub async fn len(&self) -> Result<u64, DomainError> {
        self.store.outbox_len().await
    }

    pub async fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.store.outbox_len().await? == 0)
    }

    pub async fn get(&self, alert_id: &str) -> Result<Option<OutboxEntry>, DomainError> {
        self.store.outbox_get(alert_id).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError> {
        self.store.outbox_dead_letters().await
    }

    /// Resolves when new work may be available. Used by the delivery loop
    /// to sleep without polling on an empty queue.
    pub async fn wait_for_work(&self) {
        self.wakeup.notified().await;
    }

    pub fn notify(&self) {
        self.wakeup.notify_one();
    }
}
