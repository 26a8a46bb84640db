use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use shutdown_manager::{
    BackgroundTasks, Closable, Config, ShutdownCoordinator, ShutdownError, WithTimeout,
    closable_fn, init_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    init_tracing(&config);

    info!(
        "Starting shutdown-manager demo v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the demo until a termination signal arrives.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        parallel = config.parallel,
        timeout = ?config.shutdown_timeout,
        "Configuration loaded"
    );

    // Background worker that ticks until cancelled
    let ticks = Arc::new(AtomicU64::new(0));
    let workers = BackgroundTasks::new("ticker");
    let worker_ticks = ticks.clone();
    workers.spawn(move |cancel| async move {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let n = worker_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(tick = n, "Worker tick");
                }
            }
        }
    });

    let coordinator = ShutdownCoordinator::with_os_signals(
        config.coordinator_config(),
        vec![Arc::new(workers) as Arc<dyn Closable>],
    );

    let flush = WithTimeout::new(
        closable_fn("flush", move || {
            let ticks = ticks.clone();
            async move {
                info!(ticks = ticks.load(Ordering::Relaxed), "Flushing state");
                Ok(())
            }
        }),
        Duration::from_secs(5),
    );
    if let Err(e) = coordinator.add_service(Arc::new(flush)) {
        error!("Failed to register services: {e}");
        return Err(exitcode::SOFTWARE);
    }

    info!("Running; press Ctrl+C or send SIGTERM to stop");

    coordinator.requested().await;

    // Bound the post-signal cleanup with the configured deadline
    let outcome = match config.shutdown_timeout {
        Some(timeout) => tokio::time::timeout(timeout, coordinator.wait())
            .await
            .unwrap_or(Err(ShutdownError::Timeout { timeout })),
        None => coordinator.wait().await,
    };

    outcome.map_err(|e| {
        error!("Shutdown did not complete cleanly: {e}");
        exitcode::TEMPFAIL
    })?;

    info!("Shutdown complete");
    Ok(())
}
