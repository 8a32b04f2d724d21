use anyhow::Result;
use healthsnap_agent::config::AgentConfig;
use healthsnap_agent::scheduler::Scheduler;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Resolves when SIGINT or (on unix) SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("healthsnap=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path,
        poll_period_secs = config.poll_period_secs,
        trailing_window_secs = config.trailing_window_secs,
        sampling_period_secs = config.sampling_period_secs,
        "healthsnap-agent starting"
    );

    let orchestrator = Arc::new(healthsnap_agent::build_orchestrator(&config)?);
    tracing::info!(lanes = orchestrator.lane_count(), "Orchestrator ready");
    let scheduler = Scheduler::new(config.poll_period(), config.shutdown_grace());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    scheduler
        .run(
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_tick().await;
                }
            },
            shutdown,
        )
        .await;

    tracing::info!("Shutting down gracefully");
    Ok(())
}
