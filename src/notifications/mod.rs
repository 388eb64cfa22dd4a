//! Short-lived feedback messages for mutations.
//!
//! Every notification dismisses itself after the display duration. Success
//! notifications raised after a create/update/delete can also request a
//! screen transition once the navigation delay has passed.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

const DEFAULT_DISPLAY_MS: u64 = 3000;
const DEFAULT_NAVIGATE_AFTER_MS: u64 = 1500;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub display_ms: u64,
    pub navigate_after_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            display_ms: DEFAULT_DISPLAY_MS,
            navigate_after_ms: DEFAULT_NAVIGATE_AFTER_MS,
        }
    }
}

/// Represents a notification
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Shown(Notification),
    Dismissed(Uuid),
    /// The screen that raised the notification should move on.
    NavigationRequested(Uuid),
}

struct Inner {
    display_for: Duration,
    navigate_after: Duration,
    active: Mutex<Vec<Notification>>,
    events: broadcast::Sender<NotificationEvent>,
}

/// Notification surface shared by the screens.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("display_for", &self.inner.display_for)
            .field("navigate_after", &self.inner.navigate_after)
            .finish_non_exhaustive()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(&NotificationConfig::default())
    }
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                display_for: Duration::from_millis(config.display_ms),
                navigate_after: Duration::from_millis(config.navigate_after_ms),
                active: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn success(&self, message: impl Into<String>) -> Notification {
        self.show(NotificationKind::Success, message.into(), false)
    }

    /// Success message followed by a navigation request.
    pub fn success_then_navigate(&self, message: impl Into<String>) -> Notification {
        self.show(NotificationKind::Success, message.into(), true)
    }

    pub fn error(&self, message: impl Into<String>) -> Notification {
        self.show(NotificationKind::Error, message.into(), false)
    }

    /// Error notification for a failed operation.
    pub fn failure(&self, err: &ServiceError) -> Notification {
        self.error(format!("Error: {}", err.response_message()))
    }

    /// Removes a notification before its timer does. Returns false if it was
    /// already gone.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let removed = {
            let mut active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            let before = active.len();
            active.retain(|n| n.id != id);
            active.len() != before
        };
        if removed {
            let _ = self.inner.events.send(NotificationEvent::Dismissed(id));
        }
        removed
    }

    /// Notifications currently on screen, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.events.subscribe()
    }

    fn show(&self, kind: NotificationKind, message: String, navigate: bool) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            message,
            created_at: Utc::now(),
        };
        debug!(id = %notification.id, ?kind, message = %notification.message, "notification shown");

        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        let _ = self
            .inner
            .events
            .send(NotificationEvent::Shown(notification.clone()));

        let id = notification.id;
        let weak = Arc::downgrade(&self.inner);
        self.after(self.inner.display_for, weak.clone(), move |notifier| {
            notifier.dismiss(id);
        });
        if navigate {
            self.after(self.inner.navigate_after, weak, move |notifier| {
                let _ = notifier
                    .inner
                    .events
                    .send(NotificationEvent::NavigationRequested(id));
            });
        }
        notification
    }

    fn after<F>(&self, delay: Duration, inner: Weak<Inner>, action: F)
    where
        F: FnOnce(Notifier) + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available; notification timers disabled");
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                action(Notifier { inner });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn notifications_dismiss_themselves() {
        let notifier = Notifier::default();
        let shown = notifier.error("Failed to add product");
        assert_eq!(notifier.active(), vec![shown.clone()]);

        sleep(Duration::from_millis(2900)).await;
        assert_eq!(notifier.active().len(), 1);

        sleep(Duration::from_millis(200)).await;
        assert!(notifier.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_requests_navigation_before_dismissal() {
        let notifier = Notifier::default();
        let mut events = notifier.subscribe();
        let shown = notifier.success_then_navigate("Product created successfully");

        assert_eq!(events.recv().await.unwrap(), NotificationEvent::Shown(shown.clone()));

        sleep(Duration::from_millis(1400)).await;
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(
            events.try_recv(),
            Ok(NotificationEvent::NavigationRequested(shown.id))
        );

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(events.try_recv(), Ok(NotificationEvent::Dismissed(shown.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_dismissal_wins_over_the_timer() {
        let notifier = Notifier::default();
        let mut events = notifier.subscribe();
        let shown = notifier.success("Saved");
        assert!(notifier.dismiss(shown.id));
        assert!(!notifier.dismiss(shown.id));

        sleep(Duration::from_secs(5)).await;
        assert_matches::assert_matches!(events.try_recv(), Ok(NotificationEvent::Shown(_)));
        assert_eq!(events.try_recv(), Ok(NotificationEvent::Dismissed(shown.id)));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn failure_uses_the_public_message() {
        let notifier = Notifier::default();
        let err = ServiceError::store(
            "Failed to delete product with ID 42",
            std::io::Error::new(std::io::ErrorKind::Other, "permission denied"),
        );
        assert_eq!(
            notifier.failure(&err).message,
            "Error: Failed to delete product with ID 42"
        );
    }
}
