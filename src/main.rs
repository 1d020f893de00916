use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use lidar_relay::api::{AppState, create_routes};
use lidar_relay::cli::{Cli, Commands};
use lidar_relay::config::{self, AppConfig};
use lidar_relay::relay::{DatagramRelay, target};
use lidar_relay::supervisor::WorkerSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { .. } => {
            let config = config::load_config(&cli)?;
            tracing::info!(
                http = %config.http_addr,
                udp_port = config.relay.port,
                scripts = %config.workers.scripts_dir.display(),
                "Config loaded"
            );
            serve(config).await
        }
        Commands::Send {
            host,
            port,
            message,
        } => {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .context("Failed to bind an ephemeral UDP socket")?;
            let addr = target::transmit(&socket, message, host, *port).await?;
            println!("Sent {} bytes to {addr}", message.len());
            Ok(())
        }
    }
}

/// Composition root: one relay and one supervisor for the life of the
/// process, shared with the HTTP layer until Ctrl-C.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Binding is fatal on failure; nothing else has started yet.
    let relay = DatagramRelay::bind(&config.relay).await?;
    let receiver = relay.spawn_receiver(shutdown.child_token());

    let supervisor = WorkerSupervisor::new(&config.workers, shutdown.child_token());

    let app = create_routes(AppState {
        supervisor: supervisor.clone(),
        relay,
    });

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http_addr))?;
    tracing::info!("HTTP API listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("HTTP server error")?;

    supervisor.shutdown().await;
    shutdown.cancel();
    let _ = receiver.await;

    tracing::info!("lidar-relay stopped");
    Ok(())
}
