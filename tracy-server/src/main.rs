use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use tracy_core::{MemoryStore, PgStore, TracerStore, TracyConfig};

use tracy_server::http::{start_http_server, HttpState};
use tracy_server::{server, BroadcastNotifier, EventCorrelator, SubscriberNotifier, TracerCache};

/// Buffered updates per subscriber before the slowest starts losing them
const FEED_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tracy.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Keep everything in process memory instead of Postgres
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present for local development
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TracyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let pool = if args.memory {
        None
    } else {
        match tracy_core::db::create_pool(&config.database).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        }
    };

    if args.health {
        return run_health_check(pool.as_ref()).await;
    }

    let store: Arc<dyn TracerStore> = match &pool {
        Some(pool) => {
            tracy_core::db::ensure_schema(pool).await?;
            Arc::new(PgStore::new(pool.clone()))
        }
        None => {
            tracing::warn!("Running on the in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    let (cache, cache_task) = TracerCache::start(Arc::clone(&store), &config.cache);
    let notifier = BroadcastNotifier::new(FEED_CAPACITY);
    let correlator = EventCorrelator::new(
        store,
        cache.clone(),
        Arc::new(notifier.clone()) as Arc<dyn SubscriberNotifier>,
        config.tracer.max_request_size,
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let addr = format!("{}:{}", config.http.host, config.http.port);
        let state = HttpState {
            correlator,
            pool: pool.clone(),
            socket_path: config.service.socket_path.clone(),
        };
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(addr, state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    server::run_feed_server(&config.service.socket_path, notifier, tx.subscribe()).await?;

    if let Err(e) = cache.stop().await {
        tracing::warn!("Tracer cache did not stop cleanly: {}", e);
    }
    let _ = cache_task.await;

    Ok(())
}

async fn run_health_check(pool: Option<&PgPool>) -> anyhow::Result<()> {
    let Some(pool) = pool else {
        println!("✅ In-memory store, nothing to check");
        return Ok(());
    };

    match tracy_core::db::health_check(pool).await {
        Ok(v) => println!("✅ PostgreSQL connected: {}", v),
        Err(e) => {
            println!("❌ PostgreSQL connection failed: {}", e);
            std::process::exit(1);
        }
    }

    match tracy_core::db::ensure_schema(pool).await {
        Ok(()) => println!("✅ Schema present"),
        Err(e) => {
            println!("❌ Schema check failed: {}", e);
            std::process::exit(1);
        }
    }

    println!("✅ Tracy DB health check passed");
    Ok(())
}
