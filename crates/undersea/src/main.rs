//! Undersea sensor simulator
//!
//! Starts the PD1-PD4 things, polls them until Ctrl+C / SIGTERM (or for a
//! fixed number of ticks) and logs every event they raise.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use thing_runtime::ServiceManager;
use undersea::{Config, Fleet, ThingGateway, devices};

#[derive(Parser, Debug)]
#[command(name = "undersea")]
#[command(about = "Simulated underwater sensor things", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "undersea.toml")]
    config: PathBuf,

    /// Override the polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Stop after this many polling intervals instead of waiting for a signal
    #[arg(long)]
    ticks: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(interval_ms) = args.interval_ms {
        config.polling.interval_ms = interval_ms;
    }
    config.log.json |= args.json;
    config.validate()?;

    init_tracing(&config);

    info!(config = %args.config.display(), "Starting undersea");

    let service_manager = Arc::new(
        ServiceManager::new().with_shutdown_timeout(config.shutdown_timeout()),
    );

    let fleet = match Fleet::start(&config, &service_manager, &devices::random_sources).await {
        Ok(fleet) => fleet,
        Err(e) => {
            service_manager.shutdown_all().await?;
            return Err(e.into());
        }
    };
    let gateway = ThingGateway::new(Arc::clone(fleet.registry()));

    for thing in gateway.list_things() {
        info!(
            thing_id = %thing.id,
            title = %thing.title,
            properties = thing.properties.len(),
            events = thing.events.len(),
            "Thing available"
        );
    }

    let (subscription, mut events) = gateway.event_stream("*", 256);
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    thing_id = %event.thing_id,
                    event = %event.name,
                    data = %event.data,
                    "Event emitted"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match args.ticks {
        Some(ticks) => {
            let run_for = config.poll_interval() * ticks;
            tokio::select! {
                _ = tokio::time::sleep(run_for) => {
                    info!(ticks, "Tick budget reached, shutting down...");
                }
                _ = shutdown_signal() => {}
            }
        }
        None => shutdown_signal().await,
    }

    let result = service_manager.shutdown_all().await;

    // Dropping the last hook closes the stream
    gateway.unsubscribe(subscription);
    if let Err(e) = event_log.await {
        warn!(error = %e, "Event log task failed");
    }

    for handle in fleet.pollers() {
        info!(
            service_id = %handle.service_id,
            state = ?handle.state(),
            ticks = handle.ticks(),
            restarts = handle.restarts(),
            "Poller finished"
        );
    }

    result?;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));

    let json = config.log.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
