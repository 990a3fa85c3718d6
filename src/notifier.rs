//! Desktop notifications over the freedesktop notification service.
//!
//! `DesktopNotifier` is the synchronous handle the controller uses; it only
//! queues requests. `NotifierTask` runs on the tokio runtime, owns the D-Bus
//! session connection and maps our notice ids to the ids the notification
//! server assigns. When no session bus is reachable the requests are logged
//! and dropped.

use crate::collaborators::{Notice, NotificationSink};
use crate::error::NotifyError;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::zvariant::Value;
use zbus::Connection;

const NOTIFICATIONS_DEST: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const APP_NAME: &str = "hdmi-link";
/// Persistent until dismissed or cancelled.
const EXPIRE_NEVER: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyRequest {
    Show(Notice),
    Cancel(u32),
}

/// Queueing handle implementing `NotificationSink`.
pub struct DesktopNotifier {
    requests: mpsc::UnboundedSender<NotifyRequest>,
}

impl DesktopNotifier {
    /// Create the handle together with the task that delivers its requests.
    pub fn channel() -> (Self, NotifierTask) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self { requests },
            NotifierTask {
                rx,
                connection: None,
                server_ids: HashMap::new(),
            },
        )
    }

    fn enqueue(&self, request: NotifyRequest) {
        if self.requests.send(request).is_err() {
            warn!("{}", NotifyError::WorkerGone);
        }
    }
}

impl NotificationSink for DesktopNotifier {
    fn show(&self, notice: &Notice) {
        self.enqueue(NotifyRequest::Show(notice.clone()));
    }

    fn cancel(&self, id: u32) {
        self.enqueue(NotifyRequest::Cancel(id));
    }
}

/// Delivers queued notification requests to the session bus.
pub struct NotifierTask {
    rx: mpsc::UnboundedReceiver<NotifyRequest>,
    connection: Option<Connection>,
    /// Our notice id -> id assigned by the notification server.
    server_ids: HashMap<u32, u32>,
}

impl NotifierTask {
    /// Process requests until every `DesktopNotifier` handle is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            if let Err(e) = self.deliver(request).await {
                warn!("Notification delivery failed: {}", e);
                // Reconnect on the next request
                self.connection = None;
            }
        }
        debug!("Notifier task finished");
    }

    async fn connection(&mut self) -> Result<&Connection, NotifyError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => Connection::session().await?,
        };
        Ok(self.connection.insert(connection))
    }

    async fn deliver(&mut self, request: NotifyRequest) -> Result<(), NotifyError> {
        match request {
            NotifyRequest::Show(notice) => {
                let replaces_id = self.server_ids.get(&notice.id).copied().unwrap_or(0);
                let actions = vec!["default", notice.action.as_str()];
                let hints: HashMap<&str, Value<'_>> = HashMap::new();

                let connection = self.connection().await?;
                let reply = connection
                    .call_method(
                        Some(NOTIFICATIONS_DEST),
                        NOTIFICATIONS_PATH,
                        Some(NOTIFICATIONS_DEST),
                        "Notify",
                        &(
                            APP_NAME,
                            replaces_id,
                            "video-display",
                            notice.title.as_str(),
                            notice.body.as_str(),
                            actions,
                            hints,
                            EXPIRE_NEVER,
                        ),
                    )
                    .await?;

                let server_id: u32 = reply.body().deserialize()?;
                self.server_ids.insert(notice.id, server_id);
                debug!("Posted notice {} as {}", notice.id, server_id);
            }
            NotifyRequest::Cancel(id) => {
                let Some(server_id) = self.server_ids.remove(&id) else {
                    return Ok(());
                };

                let connection = self.connection().await?;
                connection
                    .call_method(
                        Some(NOTIFICATIONS_DEST),
                        NOTIFICATIONS_PATH,
                        Some(NOTIFICATIONS_DEST),
                        "CloseNotification",
                        &(server_id,),
                    )
                    .await?;
                debug!("Closed notice {} ({})", id, server_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_queues_requests_in_order() {
        let (notifier, mut task) = DesktopNotifier::channel();
        let notice = Notice::cable_connected();

        notifier.show(&notice);
        notifier.cancel(notice.id);

        assert_eq!(task.rx.try_recv().unwrap(), NotifyRequest::Show(notice.clone()));
        assert_eq!(task.rx.try_recv().unwrap(), NotifyRequest::Cancel(notice.id));
        assert!(task.rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_survives_stopped_task() {
        let (notifier, task) = DesktopNotifier::channel();
        drop(task);
        notifier.show(&Notice::cable_connected());
        notifier.cancel(0);
    }

    #[tokio::test]
    async fn test_cancel_of_unknown_notice_needs_no_bus() {
        let (_notifier, mut task) = DesktopNotifier::channel();
        task.deliver(NotifyRequest::Cancel(42)).await.unwrap();
        assert!(task.connection.is_none());
    }
}
