//! External full-text engine driver
//!
//! Supervises the zoekt pair (indexer + web server on a loopback port):
//! spawn, health probe, restart with capped backoff, debounced reindex,
//! graceful shutdown. Query translation lives in [`query`].
//!
//! The engine is optional. When it is disabled, unhealthy, or mid-restart,
//! `/grep` falls back to the internal trigram scanner transparently.

pub mod query;

use crate::config::ZoektConfig;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_RESTART_ATTEMPTS: u32 = 5;
const WEB_KILL_GRACE: Duration = Duration::from_secs(2);
const INDEXER_KILL_GRACE: Duration = Duration::from_secs(1);

pub struct ZoektDriver {
    config: ZoektConfig,
    index_dir: PathBuf,
    mirror_dir: PathBuf,
    web_binary: Option<PathBuf>,
    index_binary: Option<PathBuf>,
    web_child: Mutex<Option<Child>>,
    index_child: Mutex<Option<Child>>,
    healthy: AtomicBool,
    auto_restart: AtomicBool,
    indexing: AtomicBool,
    reindex_pending: AtomicBool,
    restart_attempts: AtomicU32,
}

impl ZoektDriver {
    pub fn new(config: ZoektConfig, index_dir: &Path, mirror_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            web_binary: find_binary("zoekt-webserver"),
            index_binary: find_binary("zoekt-index"),
            config,
            index_dir: index_dir.to_path_buf(),
            mirror_dir: mirror_dir.to_path_buf(),
            web_child: Mutex::new(None),
            index_child: Mutex::new(None),
            healthy: AtomicBool::new(false),
            auto_restart: AtomicBool::new(true),
            indexing: AtomicBool::new(false),
            reindex_pending: AtomicBool::new(false),
            restart_attempts: AtomicU32::new(0),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.disabled && self.web_binary.is_some()
    }

    pub fn web_port(&self) -> u16 {
        self.config.web_port
    }

    /// Start the web server and wait for it to come up. Called before the
    /// HTTP listener starts accepting requests. Missing binaries degrade
    /// to the internal grep path rather than failing startup.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.config.disabled {
            info!("Full-text engine disabled by config");
            return Ok(());
        }
        let Some(web_binary) = self.web_binary.clone() else {
            warn!("zoekt-webserver not found on PATH; /grep will use the internal scanner");
            return Ok(());
        };

        std::fs::create_dir_all(&self.index_dir)
            .with_context(|| format!("cannot create index dir {}", self.index_dir.display()))?;

        self.spawn_web(&web_binary).await?;
        self.wait_healthy().await?;
        self.restart_attempts.store(0, Ordering::Relaxed);
        self.clone().supervise();
        info!(
            "✅ Full-text engine ready on 127.0.0.1:{}",
            self.config.web_port
        );
        Ok(())
    }

    async fn spawn_web(&self, binary: &Path) -> Result<()> {
        debug!("Spawning {} for index {}", binary.display(), self.index_dir.display());
        let child = Command::new(binary)
            .arg("-listen")
            .arg(format!("127.0.0.1:{}", self.config.web_port))
            .arg("-index")
            .arg(&self.index_dir)
            .arg("-rpc")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot spawn {}", binary.display()))?;
        *self.web_child.lock().await = Some(child);
        Ok(())
    }

    async fn wait_healthy(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + HEALTH_PROBE_TIMEOUT;
        let port = self.config.web_port;
        loop {
            let ok = tokio::task::spawn_blocking(move || query::probe_health(port))
                .await
                .unwrap_or(false);
            if ok {
                self.healthy.store(true, Ordering::Relaxed);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                self.healthy.store(false, Ordering::Relaxed);
                return Err(anyhow!(
                    "engine web server not healthy within {:?}",
                    HEALTH_PROBE_TIMEOUT
                ));
            }
            tokio::time::sleep(HEALTH_PROBE_INTERVAL).await;
        }
    }

    /// Watch the web server; restart with capped exponential backoff on
    /// unexpected exit. Graceful shutdown disables auto-restart first.
    fn supervise(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                // Poll with try_wait so shutdown can take the child while
                // we watch it.
                let status = loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let mut guard = self.web_child.lock().await;
                    match guard.as_mut() {
                        Some(child) => {
                            if let Ok(Some(status)) = child.try_wait() {
                                *guard = None;
                                break status;
                            }
                        }
                        None => return,
                    }
                };
                self.healthy.store(false, Ordering::Relaxed);

                if !self.auto_restart.load(Ordering::Relaxed) {
                    debug!("Engine web server exited during shutdown");
                    return;
                }

                let attempt = self.restart_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if attempt > MAX_RESTART_ATTEMPTS {
                    error!(
                        "Engine web server exited ({}) and exhausted {} restart attempts; \
                         /grep stays on the internal scanner",
                        status, MAX_RESTART_ATTEMPTS
                    );
                    return;
                }

                let backoff = RESTART_BACKOFF_BASE
                    .saturating_mul(1u32 << (attempt - 1).min(5))
                    .min(RESTART_BACKOFF_CAP);
                warn!(
                    "Engine web server exited unexpectedly ({}); restart {}/{} in {:?}",
                    status, attempt, MAX_RESTART_ATTEMPTS, backoff
                );
                tokio::time::sleep(backoff).await;

                let Some(binary) = self.web_binary.clone() else {
                    return;
                };
                if let Err(e) = self.spawn_web(&binary).await {
                    error!("Engine restart failed: {}", e);
                    continue;
                }
                if let Err(e) = self.wait_healthy().await {
                    warn!("Engine restarted but not healthy: {}", e);
                    continue;
                }
                info!("✅ Engine web server restarted");
            }
        });
    }

    /// Coalesce repeated reindex requests into a single delayed job.
    pub fn trigger_reindex(self: Arc<Self>) {
        if !self.is_enabled() || self.index_binary.is_none() {
            return;
        }
        if self.reindex_pending.swap(true, Ordering::AcqRel) {
            // A job is already scheduled; this request rides along
            return;
        }
        let driver = self.clone();
        let debounce = Duration::from_millis(self.config.reindex_debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            driver.reindex_pending.store(false, Ordering::Release);
            if let Err(e) = driver.run_index().await {
                warn!("Reindex failed: {}", e);
            }
        });
    }

    /// Run the indexer over the mirror. Only one job at a time; a request
    /// arriving while one runs is dropped (the debounce path coalesces).
    pub async fn run_index(&self) -> Result<()> {
        let Some(binary) = self.index_binary.clone() else {
            return Ok(());
        };
        if self.indexing.swap(true, Ordering::AcqRel) {
            debug!("Indexing already in progress, dropping request");
            return Ok(());
        }

        let started = std::time::Instant::now();
        let result = async {
            let child = Command::new(&binary)
                .arg("-index")
                .arg(&self.index_dir)
                .arg("-parallelism")
                .arg(self.config.parallelism.to_string())
                .arg("-file_limit")
                .arg(self.config.file_limit_bytes.to_string())
                .arg(&self.mirror_dir)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("cannot spawn {}", binary.display()))?;

            *self.index_child.lock().await = Some(child);
            // Poll instead of wait(): holding the child lock across an
            // await would block shutdown from killing the indexer.
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut guard = self.index_child.lock().await;
                match guard.as_mut() {
                    Some(child) => {
                        if let Some(status) = child.try_wait()? {
                            *guard = None;
                            if !status.success() {
                                return Err(anyhow!("indexer exited with {}", status));
                            }
                            return Ok(());
                        }
                    }
                    // Shutdown took the child
                    None => return Ok(()),
                }
            }
        }
        .await;

        self.indexing.store(false, Ordering::Release);
        if result.is_ok() {
            info!("✅ Engine reindex complete in {:?}", started.elapsed());
        }
        result
    }

    /// Graceful shutdown: stop restarting, terminate the indexer, then
    /// the web server, each with a hard kill after its grace period.
    pub async fn shutdown(&self) {
        self.auto_restart.store(false, Ordering::Relaxed);
        self.healthy.store(false, Ordering::Relaxed);

        if let Some(child) = self.index_child.lock().await.take() {
            terminate(child, INDEXER_KILL_GRACE).await;
        }
        if let Some(child) = self.web_child.lock().await.take() {
            terminate(child, WEB_KILL_GRACE).await;
        }
        info!("Full-text engine stopped");
    }
}

/// SIGTERM, then SIGKILL once the grace period runs out.
async fn terminate(mut child: Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("kill")
            .arg(pid.to_string())
            .status();
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.kill().await;
        }
    }
}

/// Locate a helper binary: explicit override first, then PATH.
fn find_binary(name: &str) -> Option<PathBuf> {
    let env_key = format!(
        "{}_BIN",
        name.to_ascii_uppercase().replace('-', "_")
    );
    if let Ok(explicit) = std::env::var(&env_key) {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Some(path);
        }
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{}.exe", name));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
