use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use tally_cache::{
    BatchQueue, CacheManager, CacheSettings, CacheTier, InMemoryCacheTier, LookupCache,
    QueryService, RedisCacheTier,
};
use tally_config::TallyConfig;
use tally_gateway::{GatewayState, RateLimiter};
use tally_store::{ActivityStore, SqliteActivityStore};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally — per-guild chat activity tracking service")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Tally runtime: reconciliation cycles plus the query API
    Serve {
        /// Port to bind the query API to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check whether a Tally instance is listening
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = TallyConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            logging::init_logger(
                Some(Path::new(&config.logging.dir)),
                &config.logging.level,
            );
            run_server(config).await
        }
        Commands::Status => {
            let addr = format!("{}:{}", config.bind_address, config.port);
            match tokio::net::TcpStream::connect(&addr).await {
                Ok(_) => println!("Tally is listening on {addr}"),
                Err(err) => println!("Tally is not reachable on {addr}: {err}"),
            }
            Ok(())
        }
    }
}

async fn run_server(config: TallyConfig) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        db = %config.db_path,
        "Starting Tally runtime"
    );

    let store: Arc<dyn ActivityStore> = Arc::new(SqliteActivityStore::open(&config.db_path)?);

    let tier: Arc<dyn CacheTier> = match &config.redis_url {
        Some(url) => Arc::new(RedisCacheTier::connect(url).await?),
        None => {
            info!("No Redis URL configured, using in-process cache tier");
            Arc::new(InMemoryCacheTier::new())
        }
    };

    let queue = Arc::new(BatchQueue::new());
    let lookup = Arc::new(LookupCache::new());
    let settings = CacheSettings {
        key_prefix: config.cache.key_prefix.clone(),
        flush_interval: Duration::from_secs(config.cache.flush_interval_secs),
        invalidate_interval: Duration::from_secs(config.cache.invalidate_interval_secs),
        persist_batch_size: config.cache.persist_batch_size,
    };
    let manager = Arc::new(CacheManager::new(
        queue,
        tier,
        store.clone(),
        lookup.clone(),
        settings,
    ));

    // Counts a previous process flushed but never persisted.
    manager.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (flush_handle, invalidate_handle) = manager.spawn_cycles(shutdown_rx);

    let state = GatewayState {
        query: Arc::new(QueryService::new(lookup, store)),
        limiter: Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window_secs,
        )),
    };
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .context("Invalid bind address")?;

    let server = tokio::spawn(async move {
        if let Err(err) = tally_gateway::start_server(addr, state).await {
            error!(error = %err, "Query API server exited");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = flush_handle.await;
    let _ = invalidate_handle.await;

    // Final drain so increments since the last ticks are not lost.
    manager.flush_cycle().await;
    manager.invalidation_cycle().await;

    server.abort();
    info!("Tally stopped");
    Ok(())
}
