use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use crate::alerting::sinks::NotificationSink;

/// A push request handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub title: String,
    pub body: String,
    pub metadata: HashMap<String, String>,
}

impl Notification {
    pub fn new(recipients: Vec<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients,
            title: title.into(),
            body: body.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Fire-and-forget front of the notification queue.
///
/// `notify` never blocks and never fails: a full or closed queue drops the message with a log line,
/// so delivery can never sit on the arbitration path.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<Notification>,
    enabled: bool,
}

impl NotificationDispatcher {
    /// Creates the dispatcher and the receiving end its worker drains.
    pub fn channel(capacity: usize, enabled: bool) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, enabled }, receiver)
    }

    pub fn notify(&self, notification: Notification) {
        if notification.recipients.is_empty() {
            debug!("Dropping notification '{}' with no recipients", notification.title);
            return;
        }
        if !self.enabled {
            debug!("Notifications disabled, dropping '{}'", notification.title);
            return;
        }

        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!("Notification queue full, dropping '{}' for {:?}", n.title, n.recipients);
            }
            Err(TrySendError::Closed(n)) => {
                error!("Notification queue closed, dropping '{}' for {:?}", n.title, n.recipients);
            }
        }
    }

    /// Checks if the notification channel is still open.
    pub fn is_channel_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Drains the notification queue into a sink.
pub struct NotificationWorker {
    receiver: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationWorker {
    pub fn new(receiver: mpsc::Receiver<Notification>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { receiver, sink }
    }

    /// Runs until every dispatcher handle is dropped. Delivery errors are logged and swallowed.
    pub async fn run(mut self) {
        info!("NotificationWorker started");
        while let Some(notification) = self.receiver.recv().await {
            if let Err(e) = self.sink.deliver(&notification).await {
                error!("Failed to deliver notification '{}': {}", notification.title, e);
            }
        }
        info!("NotificationWorker stopped");
    }
}
