use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use unreal_index::config::Config;
use unreal_index::engine::ZoektDriver;
use unreal_index::http::{self, admin, AppState};
use unreal_index::ingest::IngestService;
use unreal_index::memory::MemoryIndex;
use unreal_index::mirror::MirrorMaintainer;
use unreal_index::pool::QueryPool;
use unreal_index::store::IndexStore;

/// Resolve the config path: one positional argument, or the
/// UNREAL_INDEX_CONFIG environment variable.
fn config_path() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    if let Some(path) = args.get(1) {
        return Some(PathBuf::from(path));
    }
    env::var("UNREAL_INDEX_CONFIG").ok().map(PathBuf::from)
}

#[tokio::main]
async fn main() {
    // Exit code contract: 0 clean shutdown, 1 fatal startup error
    if let Err(e) = run().await {
        error!("❌ Fatal: {:#}", e);
        eprintln!("unreal-index: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = match config_path() {
        Some(path) => Config::load(&path)?,
        None => {
            eprintln!("usage: unreal-index <config.json>  (or set UNREAL_INDEX_CONFIG)");
            anyhow::bail!("no config path given");
        }
    };

    // Logging: stderr plus a daily-rolling file next to the data dir
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("unreal_index=info"))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging filter: {}", e))?;

    let logs_dir = config
        .data
        .db_path
        .parent()
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    fs::create_dir_all(&logs_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create logs directory at {:?}: {}", logs_dir, e);
    });
    let file_appender = rolling::daily(&logs_dir, "unreal-index.log");
    let (non_blocking_file, _file_guard) = non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_ansi(false),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("🚀 Starting unreal-index v{}", env!("CARGO_PKG_VERSION"));
    info!("📝 Logging to {:?}", logs_dir.join("unreal-index.log"));

    // Startup order: store -> memory index -> mirror -> engine -> HTTP
    let store = IndexStore::open(&config.data.db_path)?;
    let db_path = store.db_path().to_path_buf();
    let store = Arc::new(tokio::sync::Mutex::new(store));

    let memory = Arc::new(MemoryIndex::new());
    {
        let conn = IndexStore::open_read_only(&db_path)?;
        let memory = memory.clone();
        tokio::task::spawn_blocking(move || memory.load(&conn)).await??;
    }

    let mirror = Arc::new(MirrorMaintainer::new(&config.data.mirror_dir));
    if !mirror.load_marker() {
        let guard = store.lock().await;
        mirror.bootstrap(&guard)?;
    }

    let engine = ZoektDriver::new(
        config.zoekt.clone(),
        &config.data.index_dir,
        &config.data.mirror_dir,
    );
    if let Err(e) = engine.clone().start().await {
        warn!("Full-text engine unavailable, /grep uses the internal scanner: {}", e);
    }

    let pool = QueryPool::spawn(
        db_path.clone(),
        config.service.query_pool_size,
        std::time::Duration::from_millis(config.service.query_timeout_ms),
    )?;

    let ingest = Arc::new(IngestService::new(
        store.clone(),
        memory.clone(),
        mirror.clone(),
        engine.clone(),
        config.clone(),
    ));

    let analytics = admin::spawn_analytics_writer(store.clone());

    let state: http::SharedState = Arc::new(AppState {
        config: config.clone(),
        db_path,
        store: store.clone(),
        pool: pool.clone(),
        memory,
        mirror,
        engine: engine.clone(),
        ingest,
        started_at: Instant::now(),
        stop_watcher: AtomicBool::new(false),
        analytics,
    });

    let addr = format!("{}:{}", config.service.host, config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind {}: {}", addr, e))?;
    info!("🎯 Serving on http://{}", addr);

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🧹 Shutting down");
    engine.shutdown().await;
    pool.shutdown();

    // Checkpoint the WAL so it does not grow without bound across runs
    match store.lock().await.checkpoint_wal() {
        Ok((busy, log, checkpointed)) => {
            info!(
                "✅ WAL checkpoint complete: busy={}, log={}, checkpointed={}",
                busy, log, checkpointed
            );
        }
        Err(e) => {
            warn!("⚠️ WAL checkpoint failed: {}", e);
        }
    }

    info!("🏁 unreal-index stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
