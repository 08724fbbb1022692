//! Parlor meeting relay server
//!
//! Wires together the control-plane TCP listener (C5), the two UDP media
//! relays (C7), and the WebSocket gateway (C8) behind one shutdown
//! signal, following the source's single-process layout: one listener
//! per transport, sharing the same room and session state.

mod config;
mod credentials;
mod error;
mod rate_limit;
mod room;
mod routing;
mod server;
mod session;
mod udp;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::RelayConfig;
use credentials::CredentialStore;
use server::RelayState;

#[derive(Parser)]
#[command(name = "parlor-relay")]
#[command(about = "Parlor meeting relay server", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Falls back to built-in defaults
    /// overlaid with `PARLOR_*` environment variables.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RelayConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    if let Err(e) = parlor_crypto::init() {
        tracing::error!(error = %e, "failed to initialize cryptography runtime");
        std::process::exit(1);
    }

    let credentials = match CredentialStore::load(&config.users_file) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load credential store");
            std::process::exit(1);
        }
    };

    let tcp_addr = config.tcp_addr();
    let udp_voice_addr = config.udp_voice_addr();
    let udp_video_addr = config.udp_video_addr();
    let ws_addr = config.ws_addr();
    let udp_liveness = Duration::from_secs(config.udp_liveness_secs);
    let udp_sweep_secs = config.udp_sweep_interval_secs;
    let udp_rate_limit = config.udp_rate_limit_pps;

    let state = Arc::new(RelayState::new(config, credentials));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let voice_relay = Arc::new(udp::UdpRelay::new(udp_liveness, udp_rate_limit));
    let video_relay = Arc::new(udp::UdpRelay::new(udp_liveness, udp_rate_limit));

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn({
        let state = state.clone();
        let addr = tcp_addr.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = server::run_tcp_listener(state, &addr, shutdown).await {
                tracing::error!(error = %e, "control-plane listener failed");
            }
        }
    }));

    tasks.push(tokio::spawn({
        let relay = voice_relay.clone();
        let addr = udp_voice_addr;
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = udp::run_udp_listener(relay, &addr, "voice", shutdown).await {
                tracing::error!(error = %e, "voice UDP listener failed");
            }
        }
    }));

    tasks.push(tokio::spawn({
        let relay = video_relay.clone();
        let addr = udp_video_addr;
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = udp::run_udp_listener(relay, &addr, "video", shutdown).await {
                tracing::error!(error = %e, "video UDP listener failed");
            }
        }
    }));

    tasks.push(tokio::spawn({
        let relay = voice_relay;
        let shutdown = shutdown_rx.clone();
        async move { udp::run_liveness_sweeper(relay, udp_sweep_secs, shutdown).await }
    }));
    tasks.push(tokio::spawn({
        let relay = video_relay;
        let shutdown = shutdown_rx.clone();
        async move { udp::run_liveness_sweeper(relay, udp_sweep_secs, shutdown).await }
    }));

    let gateway_state = Arc::new(websocket::GatewayState {
        upstream_addr: tcp_addr,
    });
    let app = websocket::ws_router(gateway_state);
    tasks.push(tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        async move {
            let listener = match tokio::net::TcpListener::bind(&ws_addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(error = %e, addr = %ws_addr, "failed to bind WebSocket gateway");
                    return;
                }
            };
            tracing::info!(addr = %ws_addr, "WebSocket gateway bound");
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "WebSocket gateway failed");
            }
        }
    }));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping listeners");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("relay stopped");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
