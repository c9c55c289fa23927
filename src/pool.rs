//! Query pool
//!
//! A fixed-size set of worker threads isolates blocking durable-store
//! reads from the request loop. Each worker owns its own read-only SQLite
//! connection. Requests queue on a bounded channel; the first idle worker
//! picks up the next one. Pending requests carry a timeout that rejects
//! the waiter and frees the slot.
//!
//! Hot lookups served by the memory index never come through here; the
//! pool exists for queries whose result set cannot be materialized in
//! memory (content fetches for context attachment, admin reads, grep
//! candidate selection).

use crate::error::ServiceError;
use crate::store::IndexStore;
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_POOL_SIZE: usize = 3;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_DEPTH_PER_WORKER: usize = 8;

type Job = Box<dyn FnOnce(&Connection) + Send + 'static>;

pub struct QueryPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    timeout: Duration,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl QueryPool {
    pub fn spawn(db_path: PathBuf, size: usize, timeout: Duration) -> Result<Arc<Self>> {
        let size = size.max(1);
        let (sender, receiver) = sync_channel::<Job>(size * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver = receiver.clone();
            let db_path = db_path.clone();
            workers.push(std::thread::Builder::new()
                .name(format!("query-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, db_path, receiver))?);
        }

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            timeout,
            workers: Mutex::new(workers),
        }))
    }

    /// Run a read closure on the first idle worker. Over-queue rejects
    /// with Unavailable; slow queries reject with Timeout and the slot is
    /// reused when the worker eventually finishes.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel::<Result<T>>();

        let wrapped: Job = Box::new(move |conn| {
            let outcome = job(conn);
            // Receiver gone means the waiter timed out; nothing to do
            let _ = reply_tx.send(outcome);
        });

        {
            let guard = self.sender.lock().unwrap();
            let Some(sender) = guard.as_ref() else {
                return Err(anyhow!(ServiceError::Unavailable(
                    "query pool is shut down".to_string()
                )));
            };
            match sender.try_send(wrapped) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    return Err(anyhow!(ServiceError::Unavailable(
                        "query pool saturated".to_string()
                    )));
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(anyhow!(ServiceError::Unavailable(
                        "query pool is shut down".to_string()
                    )));
                }
            }
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!(ServiceError::Internal(
                "query worker dropped the request".to_string()
            ))),
            Err(_) => Err(anyhow!(ServiceError::Timeout(
                self.timeout.as_millis() as u64
            ))),
        }
    }

    /// Cancel all pending requests and stop the workers.
    pub fn shutdown(&self) {
        debug!("Shutting down query pool");
        self.sender.lock().unwrap().take();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker_id: usize, db_path: PathBuf, receiver: Arc<Mutex<Receiver<Job>>>) {
    let conn = match IndexStore::open_read_only(&db_path) {
        Ok(conn) => conn,
        Err(e) => {
            error!("Query worker {} could not open the store: {}", worker_id, e);
            return;
        }
    };
    debug!("Query worker {} ready", worker_id);

    loop {
        let job = {
            let guard = receiver.lock().unwrap();
            guard.recv()
        };
        let Ok(job) = job else {
            debug!("Query worker {} stopping (pool shut down)", worker_id);
            return;
        };

        // A panicking query must not take the worker with it; the slot is
        // respawned in place by surviving the job.
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| job(&conn)));
        if result.is_err() {
            warn!("Query worker {} recovered from a panicking job", worker_id);
        }
    }
}
