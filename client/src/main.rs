use hubload::config::Config;
use hubload::transport::WebSocketConnector;
use hubload::{LoadSession, SessionError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between pool size reports while the session runs
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("hubload v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment
    let config = Config::from_env()?;
    info!(
        "Hub: {} | clients {} -> {} (+{} every {}s) | message interval {}s | duration {}s",
        config.url,
        config.profile.initial_clients,
        config.profile.max_clients,
        config.profile.step_clients,
        config.profile.step_interval_secs,
        config.profile.messaging_interval_secs,
        config.profile.duration_secs
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("hubload-worker")
        .enable_all()
        .build()?;
    info!("Runtime started with {} worker threads", config.worker_threads);

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let connector = Arc::new(WebSocketConnector::new(config.transport.clone()));
    let mut session = LoadSession::new(connector);
    session.configure(config.url.clone(), config.script.clone().into_body())?;

    if config.script.is_empty() {
        warn!("No hub methods configured, connections will stay idle");
    }

    let plan = match session.run_for(&config.profile) {
        Ok(plan) => plan,
        Err(SessionError::Config(e)) => {
            error!("Invalid load profile: {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        "Running for {:?}, expecting up to {} connections",
        plan.duration,
        plan.ramp.final_size()
    );

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = session.stopped() => break,
            _ = status.tick() => {
                info!("Total connections: {}", session.pool_size());
            }
            result = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => {
                        info!("Interrupt received, stopping early");
                        session.stop();
                    }
                    Err(e) => warn!("Failed to listen for interrupt: {}", e),
                }
            }
        }
    }

    info!(
        "Waiting up to {:?} for connections to wind down",
        config.shutdown_grace
    );
    if tokio::time::timeout(config.shutdown_grace, session.wait_for_quiescence())
        .await
        .is_err()
    {
        warn!("Some tasks were still running after the shutdown grace period");
    }

    match session.ramp_report() {
        Some(report) => info!(
            "Finished with {} connections: {} batches, {} failed, {} abandoned, {} discarded",
            session.pool_size(),
            report.batches,
            report.failed,
            report.abandoned,
            report.discarded
        ),
        None => info!(
            "Finished with {} connections before the ramp completed",
            session.pool_size()
        ),
    }

    Ok(())
}
