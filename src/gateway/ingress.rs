use tracing::{debug, warn};

use crate::{
    domain::{error::DomainError, models::AlertEvent, models::ConnectionMode},
    gateway::{notify::AlertNotification, notify::NotificationSender, session::SessionTracker},
    protocol::{SubmitAlertResponse, SubmitStatus},
    storage::SqliteStore,
};

/// Cloud ingress for alert submissions: validates, deduplicates by
/// `alert_id`, persists, and triggers the notification collaborator.
#[derive(Clone)]
pub struct IngressGateway {
    store: SqliteStore,
    sessions: SessionTracker,
    notifier: NotificationSender,
    max_snapshot_bytes: usize,
}

impl IngressGateway {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        sessions: SessionTracker,
        notifier: NotificationSender,
        max_snapshot_bytes: usize,
    ) -> Self {
        Self {
            store,
            sessions,
            notifier,
            max_snapshot_bytes,
        }
    }

    /// First sight of an `alert_id` persists the event and notifies;
    /// any retransmission returns `duplicate` without re-persisting or
    /// re-notifying.
    pub async fn submit(&self, event: AlertEvent) -> Result<SubmitAlertResponse, DomainError> {
        validate(&event)?;

        if event.snapshot_len() > self.max_snapshot_bytes {
            return Err(DomainError::PayloadTooLarge(format!(
                "snapshot is {} bytes, limit is {}",
                event.snapshot_len(),
                self.max_snapshot_bytes
            )));
        }

        self.sessions
            .record_contact(&event.device_id, ConnectionMode::Polling)
            .await?;

        let inserted = self.store.alert_insert_if_absent(&event).await?;
        if !inserted {
            debug!(alert_id = %event.alert_id, "duplicate alert submission");
            return Ok(SubmitAlertResponse {
                alert_id: event.alert_id,
                status: SubmitStatus::Duplicate,
            });
        }

        // Best-effort: the durability guarantee covers the alert record,
        // not the notification.
        let notification = AlertNotification::for_event(&event);
        if let Err(error) = self.notifier.try_send(notification) {
            warn!(alert_id = %event.alert_id, "notification dropped: {error}");
        }

        debug!(
            alert_id = %event.alert_id,
            device_id = %event.device_id,
            event_type = event.event_type.as_str(),
            "alert persisted"
        );
        Ok(SubmitAlertResponse {
            alert_id: event.alert_id,
            status: SubmitStatus::Received,
        })
    }
}

fn validate(event: &AlertEvent) -> Result<(), DomainError> {
    if event.alert_id.trim().is_empty() {
        return Err(DomainError::Validation("alert_id is required".to_owned()));
    }
    if event.device_id.trim().is_empty() {
        return Err(DomainError::Validation("device_id is required".to_owned()));
    }
    if event.camera_id.trim().is_empty() {
        return Err(DomainError::Validation("camera_id is required".to_owned()));
    }
    if !event.confidence.is_finite() || !(0.0..=1.0).contains(&event.confidence) {
        return Err(DomainError::Validation(format!(
            "confidence must be within [0, 1], got {}",
            event.confidence
        )));
    }
    Ok(())
}
