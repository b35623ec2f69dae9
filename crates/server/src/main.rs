//! jobkit server entry point.

mod outbox;

// Job panics are caught per item; an aborting build would take every pool down.
#[cfg(panic = "abort")]
compile_error!("jobkit must be built with panic = \"unwind\"");

use std::sync::Arc;

use jobkit_common::Config;
use jobkit_queue::{JobServer, KvStore, Server, StoreOptions};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobkit_server=debug,jobkit_queue=debug".into()),
        )
        .init();

    info!("Starting jobkit server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to Redis
    info!("Connecting to Redis...");
    let store = Arc::new(KvStore::connect(&StoreOptions::from(&config.redis)).await?);

    let mut server = Server::from_config(&config.server);

    if config.pools.is_empty() {
        warn!("No worker pools configured, the server will idle until shutdown");
    }

    for (name, pool) in &config.pools {
        let broker = outbox::build_broker(name, pool, Arc::clone(&store));
        info!(
            pool = %name,
            queue = %outbox::queue_key(name),
            consumers = broker.consumer_num(),
            producers = broker.producer_num(),
            "Registered worker pool"
        );
        server.register(Arc::new(broker))?;
    }

    info!(endpoint = %server.endpoint()?, jobs = server.job_count(), "Server ready");
    let served = server.serve(shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, code = e.error_code(), "Job server did not stop cleanly");
    }

    store.quit().await?;
    served?;
    info!("Server shutdown complete");

    Ok(())
}
