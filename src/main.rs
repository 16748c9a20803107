use anyhow::Result;
use tracing::{error, info};
use tokio::signal::ctrl_c;
use load_dispatch::init::{initialize, AppContext};

/// The main entry point of the load dispatch engine
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}

/// Runs the engine until a shutdown signal is received
///
/// 1. Loads settings and initializes logging
/// 2. Wires the record store, the controller and the background workers
/// 3. Spawns the notification worker and the expiry sweeper
/// 4. Waits for `ctrl_c`, then stops the sweeper
async fn run() -> Result<()> {
    let AppContext {
        controller,
        notification_worker,
        expiry_sweeper,
        lifecycle,
        log_guard: _log_guard,
        ..
    } = initialize()?;

    let notification_task = tokio::spawn(notification_worker.run());
    let sweeper_task = tokio::spawn(async move { expiry_sweeper.run().await });

    info!("Load dispatch engine running");
    ctrl_c().await?;
    info!("Received shutdown signal. Shutting down gracefully...");
    lifecycle.trigger_shutdown();

    if let Err(e) = sweeper_task.await {
        error!("Expiry sweeper task failed: {:?}", e);
    }

    // The worker exits once the last dispatcher handle is gone.
    drop(controller);
    if let Err(e) = notification_task.await {
        error!("Notification worker task failed: {:?}", e);
    }
    Ok(())
}
