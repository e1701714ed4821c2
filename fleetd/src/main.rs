use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fleetd::aggregator::MetricsAggregator;
use fleetd::api;
use fleetd::cli::{Cli, Commands};
use fleetd::config::load_config;
use fleetd::engine::{Engine, EngineConfig};
use fleetd::provisioner::PortMapProvisioner;
use fleetd::worker::HttpWorkerClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Start { config } => {
            let cfg = load_config(config.to_str().unwrap_or_default())?;
            let engine_cfg = EngineConfig::from_config(&cfg)?;
            tracing::info!(
                auto_scale = cfg.auto_scale,
                scheduling_algo = %cfg.scheduling_algo,
                default_node_capacity = cfg.default_node_capacity,
                heavenly_restriction = cfg.heavenly_restriction,
                "config loaded"
            );

            let provisioner = Arc::new(PortMapProvisioner::new(
                cfg.worker_host.clone(),
                cfg.worker_base_port,
            ));
            let transport = Arc::new(HttpWorkerClient::new()?);
            let engine = Arc::new(Engine::new(engine_cfg, provisioner, transport));

            MetricsAggregator::new(engine.clone()).spawn();

            let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
            tracing::info!("listening on {}", listener.local_addr()?);

            let app = api::create_router(engine).layer(TraceLayer::new_for_http());
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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

    tracing::info!("Shutting down...");
}
