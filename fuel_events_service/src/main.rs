use anyhow::{Context, Result};
use clap::Parser;
use fuel_events_service::config::{ServerConfig, ServiceCli};
use fuel_events_service::{build_router, ServiceState, GIT_COMMIT, SERVICE_VERSION};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServiceCli::parse();
    init_tracing(&cli.server);

    let params = cli.detection.to_params();
    info!(
        refuel_rate_min = params.refuel_rate_min,
        drain_rate_min = params.drain_rate_min,
        max_rate_plausible = params.max_rate_plausible,
        min_event_min = params.min_event_min,
        tank_capacity_l = params.tank_capacity_l,
        savgol_window = params.savgol_window,
        savgol_polyorder = params.savgol_polyorder,
        merge_gap_min = params.merge_gap_min,
        "detection parameters"
    );
    let state = ServiceState::new(params).context("invalid detection parameters")?;
    let app = build_router(state);

    let addr = cli.server.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        version = SERVICE_VERSION,
        commit = GIT_COMMIT,
        "fuel-eventsd listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("fuel-eventsd stopped");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if server.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("shutdown signal received, draining connections");
}
