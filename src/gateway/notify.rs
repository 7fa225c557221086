use tokio::sync::mpsc;
use tracing::info;

use crate::domain::models::AlertEvent;

/// Fire-and-forget message handed to the notification collaborator after
/// an alert is first persisted. Delivery failure never fails `submit`.
#[derive(Debug, Clone)]
pub struct AlertNotification {
    pub subject: String,
    pub body: String,
}

impl AlertNotification {
    #[must_use]
    pub fn for_event(event: &AlertEvent) -> Self {
        let zone = event.zone.as_deref().unwrap_or("-");
        Self {
            subject: format!(
                "[{}] {} on {}/{}",
                event.event_type.as_str(),
                event.device_id,
                event.camera_id,
                zone
            ),
            body: format!(
                "alert {} type={} confidence={:.2} at {}",
                event.alert_id,
                event.event_type.as_str(),
                event.confidence,
                event.timestamp.to_rfc3339()
            ),
        }
    }
}

pub type NotificationSender = mpsc::Sender<AlertNotification>;

#[must_use]
pub fn channel(capacity: usize) -> (NotificationSender, mpsc::Receiver<AlertNotification>) {
    mpsc::channel(capacity)
}

/// Default consumer: drains the channel into the log stream. Tests swap in
/// their own receiver to observe notifications.
pub fn spawn_drain(mut receiver: mpsc::Receiver<AlertNotification>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            info!(
                subject = %notification.subject,
                body = %notification.body,
                "alert notification"
            );
        }
    })
}
