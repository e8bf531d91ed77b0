//! idgate daemon entry point.
//!
//! Wires configuration, the durable store, the injected service clients,
//! the reconciliation sweep, and the HTTP surface, then serves until
//! SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use idgate_daemon::claim::ClaimEngine;
use idgate_daemon::config::{GatewayConfig, resolve_token};
use idgate_daemon::embedding::{EmbeddingClientConfig, HttpEmbeddingClient};
use idgate_daemon::http::{AppState, router};
use idgate_daemon::retrieval::{RetrievalGateway, RetrievalOptions};
use idgate_daemon::store::SqliteAccessStore;
use idgate_daemon::sweep::sweep_loop;
use idgate_daemon::vector::{HttpVectorClient, VectorClientConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// idgate daemon - identity claim and scoped retrieval gateway
#[derive(Parser, Debug)]
#[command(name = "idgate-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "idgate.toml")]
    config: PathBuf,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if args.config.exists() {
        GatewayConfig::from_file(&args.config)
            .with_context(|| format!("loading config from {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        GatewayConfig::default()
    };
    if let Some(listen) = args.listen {
        config.daemon.listen = listen;
    }
    if let Some(db_path) = args.db_path {
        config.daemon.db_path = db_path;
    }

    // Tokens are resolved up front; an unset variable is a startup error,
    // not a per-request surprise.
    let embedding_token = resolve_token(config.embedding.token_env.as_deref())?;
    let vector_token = resolve_token(config.vector.token_env.as_deref())?;

    let store = Arc::new(
        SqliteAccessStore::open(&config.daemon.db_path)
            .with_context(|| format!("opening store at {}", config.daemon.db_path.display()))?,
    );
    info!(db = %config.daemon.db_path.display(), "store opened");

    // Service clients are constructed once and injected; there is no
    // lazily-initialized global state.
    let embedding = Arc::new(HttpEmbeddingClient::new(EmbeddingClientConfig {
        endpoint: config.embedding.endpoint.clone(),
        model: config.embedding.model.clone(),
        dimension: config.embedding.dimension,
        api_token: embedding_token,
    }));
    let vector = Arc::new(HttpVectorClient::new(VectorClientConfig {
        endpoint: config.vector.endpoint.clone(),
        api_token: vector_token,
    }));

    let engine = Arc::new(ClaimEngine::new(
        Arc::clone(&store),
        config.matcher.clone(),
        config.resolver.clone(),
    ));
    let gateway = Arc::new(RetrievalGateway::new(
        Arc::clone(&store),
        embedding,
        vector,
        config.resolver.clone(),
        RetrievalOptions {
            shared_namespace: config.retrieval.shared_namespace.clone(),
            private_marker: config.retrieval.private_marker.clone(),
            default_top_k: config.retrieval.default_top_k,
            max_top_k: config.retrieval.max_top_k,
        },
    ));

    let sweep_task = tokio::spawn(sweep_loop(
        Arc::clone(&store),
        Duration::from_secs(config.daemon.sweep_interval_secs),
        Duration::from_secs(config.daemon.sweep_grace_secs),
    ));

    let app = router(AppState { engine, gateway });
    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;
    info!(listen = %config.daemon.listen, "serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    sweep_task.abort();
    info!("shutdown complete");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
