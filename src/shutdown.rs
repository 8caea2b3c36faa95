use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Sets up a shutdown signal handler
///
/// The returned token is cancelled on the first Ctrl+C.
pub fn setup_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let shutdown = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C), finishing in-flight batches");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to install Ctrl+C signal handler: {e}"),
        }
    });

    token
}
