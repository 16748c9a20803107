mod common;

use std::sync::Arc;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use load_dispatch::alerting::{Notification, NotificationDispatcher, NotificationSink, NotificationWorker};
use load_dispatch::controllers::DispatchController;
use load_dispatch::dispatch::{DriverAction, ResponseOutcome};
use load_dispatch::errors::{DispatchError, DispatchResult};
use load_dispatch::repositories::DispatchStore;
use common::*;

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
    fail: bool,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> DispatchResult<()> {
        if self.fail {
            return Err(DispatchError::NotificationError("push gateway down".into()));
        }
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_worker_delivers_queued_notifications() {
    let (dispatcher, receiver) = NotificationDispatcher::channel(16, true);
    let sink = Arc::new(RecordingSink::default());
    let worker = NotificationWorker::new(receiver, sink.clone());

    dispatcher.notify(Notification::new(vec!["device:a".into()], "New load available", "L-1").with_meta("load_id", 1));
    dispatcher.notify(Notification::new(vec![], "Nobody", "dropped"));
    drop(dispatcher);

    worker.run().await;
    let delivered = sink.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].metadata.get("load_id").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_disabled_or_full_queue_never_fails_the_caller() {
    let (disabled, mut receiver) = NotificationDispatcher::channel(4, false);
    disabled.notify(Notification::new(vec!["x".into()], "t", "b"));
    assert!(receiver.try_recv().is_err());

    let (tiny, _receiver) = NotificationDispatcher::channel(1, true);
    for _ in 0..10 {
        tiny.notify(Notification::new(vec!["x".into()], "t", "b"));
    }
    assert!(tiny.is_channel_open());
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_arbitration() {
    let settings = Arc::new(create_mock_settings());
    let (notifier, receiver) = NotificationDispatcher::channel(4096, true);
    let store = Arc::new(DispatchStore::new(10));
    let controller = DispatchController::new(settings, store, notifier);
    let worker = NotificationWorker::new(receiver, Arc::new(RecordingSink { fail: true, ..Default::default() }));
    let worker_task = tokio::spawn(worker.run());

    let load = pending_load(&controller, "L-3000");
    let a = driver_at(&controller, "a", 1.0);
    let blast_id = controller
        .create_blast(load.id, 10.0, Utc::now() + Duration::minutes(5), None, "dispatcher")
        .unwrap();
    let outcome = controller.respond(blast_id, a.id, DriverAction::Accept).unwrap();
    assert_eq!(outcome, ResponseOutcome::Assigned { load_id: load.id, driver_id: a.id });

    drop(controller);
    worker_task.await.expect("worker task");
}
