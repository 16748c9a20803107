use std::sync::Arc;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use crate::alerting::{LogSink, Notification, NotificationDispatcher, NotificationSink, NotificationWorker, WebhookSink};
use crate::config::Settings;
use crate::controllers::DispatchController;
use crate::monitoring::ExpirySweeper;
use crate::repositories::DispatchStore;
use crate::state_management::Lifecycle;
use crate::utils::logging;

pub struct AppContext {
    pub settings: Arc<Settings>,
    pub store: Arc<DispatchStore>,
    pub controller: Arc<DispatchController>,
    pub notification_worker: NotificationWorker,
    pub expiry_sweeper: ExpirySweeper,
    pub lifecycle: Lifecycle,
    /// Flushes the file log on drop; keep it alive for the life of the process.
    pub log_guard: Option<WorkerGuard>,
}

/// Loads settings, installs logging and wires every component.
pub fn initialize() -> Result<AppContext> {
    let settings = Arc::new(Settings::new()?);
    let log_guard = logging::init_logger(settings.logging.path.clone(), &settings.logging.level)?;

    let (notifier, receiver) = NotificationDispatcher::channel(
        settings.notifications.channel_capacity,
        settings.notifications.enabled,
    );
    let mut context = build_context(Arc::clone(&settings), notifier, receiver)?;
    context.log_guard = log_guard;

    info!("Dispatch engine initialized: {}", settings.dispatch);
    Ok(context)
}

/// Wires the engine around an existing notification channel. Does not touch logging.
pub fn build_context(
    settings: Arc<Settings>,
    notifier: NotificationDispatcher,
    receiver: mpsc::Receiver<Notification>,
) -> Result<AppContext> {
    let sink: Arc<dyn NotificationSink> = match settings.notifications.webhook()? {
        Some(url) => Arc::new(WebhookSink::new(url, settings.notifications.auth_token.clone())),
        None => {
            info!("No notification webhook configured, notifications will be logged");
            Arc::new(LogSink)
        }
    };

    let store = Arc::new(DispatchStore::new(settings.dispatch.location_history_limit));
    let controller = Arc::new(DispatchController::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        notifier,
    ));
    let lifecycle = Lifecycle::new();
    let expiry_sweeper = controller.expiry_sweeper(lifecycle.clone());
    let notification_worker = NotificationWorker::new(receiver, sink);

    Ok(AppContext {
        settings,
        store,
        controller,
        notification_worker,
        expiry_sweeper,
        lifecycle,
        log_guard: None,
    })
}
