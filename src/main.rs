use std::sync::Arc;

use branchsync::replication::Dispatcher;
use branchsync::server::auth::ensure_admin_user;
use branchsync::server::AppState;
use branchsync::{create_router, NodeConfig, StorageEngine};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "branchsync")]
#[command(about = "branchsync - replicated order and inventory node", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 7600)]
    port: u16,

    /// Unique node identifier (auto-generated if not provided)
    #[arg(long)]
    node_id: Option<String>,

    /// Peer nodes to replicate with (e.g., --peer http://192.168.1.2:7600)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Data directory path
    #[arg(long, default_value = "./data")]
    data_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "branchsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::new(args.node_id, args.port, args.data_dir, args.peers);
    tracing::info!("Node ID: {}", config.node_id);
    if !config.peers.is_empty() {
        tracing::info!("Replicating to peers: {:?}", config.peers);
    }

    let engine = Arc::new(StorageEngine::open(&config.data_dir)?);
    tracing::info!("Storage engine opened at {}", config.data_dir);

    let port = config.port;
    let state = AppState::new(config, engine);

    // Bootstrap admin account (replicated like any other user mutation)
    ensure_admin_user(&state)?;

    // One outbound dispatcher task per peer, stopped via the shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatchers = Dispatcher::spawn_all(&state.queues, &state.config, shutdown_rx)?;

    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    for handle in dispatchers {
        handle.abort();
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping dispatchers...");
    let _ = shutdown_tx.send(true);
}
