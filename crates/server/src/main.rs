//! Hitspool service binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hitspool_core::config::AppConfig;
use hitspool_core::hub::local_hub_name;
use hitspool_core::TickClock;
use hitspool_metadata::{CatalogueRepo, HitspoolCatalogue};
use hitspool_server::wire::{Outbox, PushClient, Subscriber};
use hitspool_server::{LiveSink, Publisher, SenderHandle, TcpLiveSink, Worker, WorkerDeps, create_router, start_sender};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hitspool - on-demand retrieval of buffered detector hits
#[derive(Parser, Debug)]
#[command(name = "hitspoold")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HITSPOOL_CONFIG",
        default_value = "config/hitspool.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Admit client requests and hand them to the Sender
    Publisher,
    /// Serve requests for this hub
    Worker {
        /// Hub name to report as (defaults to the short host name)
        #[arg(long)]
        hub: Option<String>,
    },
    /// Receive hub reports and run the request monitor
    Sender,
    /// Publisher and Sender in one process
    Cluster,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hitspool v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    hitspool_server::metrics::register_metrics();
    let clock = Arc::new(config.ticks.clock());
    let live: Arc<dyn LiveSink> = Arc::new(TcpLiveSink::spawn(&config.live));

    match args.command {
        Command::Publisher => run_publisher(&config, clock, live).await,
        Command::Worker { hub } => run_worker(&config, clock, live, hub).await,
        Command::Sender => {
            let sender = run_sender(&config, clock, live).await?;
            wait_for(sender.monitor).await
        }
        Command::Cluster => {
            let sender = run_sender(&config, clock.clone(), live.clone()).await?;
            let outbox: Arc<dyn Outbox> = Arc::new(sender.intake.clone());
            let publisher = Arc::new(Publisher::new(config.cluster.clone(), clock, outbox, live));
            let (_, _serve) = publisher
                .listen(&config.publisher.bind)
                .await
                .with_context(|| format!("failed to bind publisher to {}", config.publisher.bind))?;
            wait_for(sender.monitor).await
        }
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", path);
    }

    figment
        .merge(Env::prefixed("HITSPOOL_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn run_publisher(config: &AppConfig, clock: Arc<TickClock>, live: Arc<dyn LiveSink>) -> Result<()> {
    let outbox: Arc<dyn Outbox> = Arc::new(PushClient::new(
        &config.publisher.sender_addr,
        config.publisher.reconnect_max(),
    ));
    let publisher = Arc::new(Publisher::new(config.cluster.clone(), clock, outbox, live));
    let (_, serve) = publisher
        .listen(&config.publisher.bind)
        .await
        .with_context(|| format!("failed to bind publisher to {}", config.publisher.bind))?;
    wait_for(serve).await
}

async fn run_worker(
    config: &AppConfig,
    clock: Arc<TickClock>,
    live: Arc<dyn LiveSink>,
    hub: Option<String>,
) -> Result<()> {
    let hub = hub
        .or_else(|| config.worker.hub_name.clone())
        .unwrap_or_else(local_hub_name);
    let catalogue: Arc<dyn CatalogueRepo> = Arc::new(HitspoolCatalogue::new(config.worker.catalogue_path()));
    let transports =
        hitspool_transport::from_config(&config.worker.transport).context("failed to configure transports")?;
    let reconnect = Duration::from_secs(config.worker.reconnect_max_secs);
    let outbox: Arc<dyn Outbox> = Arc::new(PushClient::new(&config.worker.sender_addr, reconnect));

    let worker = Worker::new(
        hub,
        config.worker.clone(),
        clock.clone(),
        WorkerDeps {
            catalogue,
            transports,
            outbox,
            live,
        },
    )
    .with_recipients(config.live.recipients.clone())
    .with_default_copy_dir(format!(
        "{}@{}:{}",
        config.cluster.rsync_user,
        config.cluster.rsync_host,
        config.sender.receive_dir.display()
    ));
    tracing::info!(hub = %worker.hub(), catalogue = %config.worker.catalogue_path().display(), "starting worker");

    let subscriber = Subscriber::new(&config.worker.subscribe_addr, reconnect, clock);
    tokio::select! {
        _ = worker.run(subscriber) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, worker stopping");
            Ok(())
        }
    }
}

async fn run_sender(config: &AppConfig, clock: Arc<TickClock>, live: Arc<dyn LiveSink>) -> Result<SenderHandle> {
    let cache_path = config.sender.cache_path();
    let store = hitspool_metadata::open_cache(&cache_path)
        .await
        .with_context(|| format!("failed to open request cache {}", cache_path.display()))?;

    let sender = start_sender(config, clock, store.clone(), live)
        .await
        .context("failed to start sender")?;
    tracing::info!(
        fanout = %sender.fanout_addr(),
        intake = %sender.intake_addr(),
        cache = %cache_path.display(),
        "sender running"
    );

    if let Some(bind) = &config.sender.metrics_bind {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind metrics listener to {bind}"))?;
        tracing::info!("Metrics listening on {}", bind);
        let app = create_router(store);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "metrics listener stopped");
            }
        });
    }

    Ok(sender)
}

async fn wait_for(task: tokio::task::JoinHandle<()>) -> Result<()> {
    tokio::select! {
        result = task => result.context("service task failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    }
}
