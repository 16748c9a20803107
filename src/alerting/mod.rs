pub mod notification_manager;
pub mod sinks;

pub use notification_manager::{Notification, NotificationDispatcher, NotificationWorker};
pub use sinks::{LogSink, NotificationSink, WebhookSink};
