//! Tracer cache: single-actor projection of per-session tracer listings
//!
//! One tokio task owns two maps keyed by session uuid:
//! - `tracers`: the session's requests (with their tracers), in insertion order
//! - `tracers_json`: memoized JSON encoding of the first map, built lazily
//!
//! Every operation is a message on one bounded mpsc channel, so operations are
//! totally ordered and the maps never need a lock. A cold load blocks the actor
//! for the whole store round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracy_core::config::CacheConfig;
use tracy_core::{Request, StoreError, TracerStore};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("tracer cache could not load session {uuid}: {source}")]
    Unavailable {
        uuid: String,
        #[source]
        source: StoreError,
    },

    #[error("tracer cache did not respond within {0:?}")]
    Timeout(Duration),

    #[error("tracer cache is stopped")]
    Closed,
}

/// How an incoming request mutates the cached listing.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// Overwrite the screenshot of one already cached tracer.
    Screenshot {
        tracer_id: i64,
        screenshot: Option<String>,
    },
    /// Append a freshly persisted request.
    Append(Request),
}

impl From<Request> for CacheUpdate {
    fn from(request: Request) -> Self {
        match request.as_tracer_patch() {
            Some(tracer) => CacheUpdate::Screenshot {
                tracer_id: tracer.id,
                screenshot: tracer.screenshot.clone(),
            },
            None => CacheUpdate::Append(request),
        }
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    cold_loads: AtomicU64,
    unmatched_screenshot_updates: AtomicU64,
    uncached_updates: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub cold_loads: u64,
    /// Screenshot patches that matched no cached tracer and were dropped.
    pub unmatched_screenshot_updates: u64,
    /// Updates for sessions that were not cached; the next read loads them.
    pub uncached_updates: u64,
}

enum Command {
    Clear,
    Read {
        uuid: String,
        reply: oneshot::Sender<Result<Vec<Request>, CacheError>>,
    },
    ReadJson {
        uuid: String,
        reply: oneshot::Sender<Result<Bytes, CacheError>>,
    },
    Update {
        uuid: String,
        update: CacheUpdate,
    },
    Stop,
}

/// Handle to the cache actor. Cheap to clone; every clone talks to the same task.
#[derive(Clone)]
pub struct TracerCache {
    tx: mpsc::Sender<Command>,
    stats: Arc<CacheStats>,
    timeout: Duration,
}

impl TracerCache {
    /// Spawn the actor. The returned task finishes after [`TracerCache::stop`]
    /// or once every handle has been dropped.
    pub fn start(store: Arc<dyn TracerStore>, config: &CacheConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(CacheStats::default());

        let worker = CacheWorker {
            store,
            stats: Arc::clone(&stats),
            tracers: HashMap::new(),
            tracers_json: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(rx));

        let cache = Self {
            tx,
            stats,
            timeout: Duration::from_millis(config.request_timeout_ms),
        };
        (cache, task)
    }

    /// Drop every cached session.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.send(Command::Clear).await
    }

    pub async fn read(&self, uuid: &str) -> Result<Vec<Request>, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Read {
            uuid: uuid.to_string(),
            reply,
        })
        .await?;
        self.recv(rx).await?
    }

    /// JSON encoding of [`TracerCache::read`]. Empty if encoding failed.
    pub async fn read_json(&self, uuid: &str) -> Result<Bytes, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReadJson {
            uuid: uuid.to_string(),
            reply,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Apply a persisted mutation to the cached listing of session `uuid`.
    ///
    /// The key is taken from the caller, never from `request`. The mutation is
    /// already durable, so a full mailbox makes the caller wait instead of
    /// timing out and leaving the cached listing stale.
    pub async fn update(&self, uuid: &str, request: Request) -> Result<(), CacheError> {
        self.tx
            .send(Command::Update {
                uuid: uuid.to_string(),
                update: request.into(),
            })
            .await
            .map_err(|_| CacheError::Closed)
    }

    /// Ask the actor to exit once it has processed everything queued before.
    pub async fn stop(&self) -> Result<(), CacheError> {
        self.send(Command::Stop).await
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            cold_loads: self.stats.cold_loads.load(Ordering::Relaxed),
            unmatched_screenshot_updates: self
                .stats
                .unmatched_screenshot_updates
                .load(Ordering::Relaxed),
            uncached_updates: self.stats.uncached_updates.load(Ordering::Relaxed),
        }
    }

    async fn send(&self, command: Command) -> Result<(), CacheError> {
        match tokio::time::timeout(self.timeout, self.tx.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CacheError::Closed),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    async fn recv<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CacheError::Closed),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

struct CacheWorker {
    store: Arc<dyn TracerStore>,
    stats: Arc<CacheStats>,
    tracers: HashMap<String, Vec<Request>>,
    tracers_json: HashMap<String, Bytes>,
}

impl CacheWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::info!("Tracer cache started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Clear => {
                    let sessions = self.tracers.len();
                    self.tracers.clear();
                    self.tracers_json.clear();
                    tracing::info!(sessions, "Tracer cache cleared");
                }
                Command::Read { uuid, reply } => {
                    let result = self.load(&uuid).await.map(|requests| requests.clone());
                    let _ = reply.send(result);
                }
                Command::ReadJson { uuid, reply } => {
                    let result = self.load_json(&uuid).await;
                    let _ = reply.send(result);
                }
                Command::Update { uuid, update } => self.apply(&uuid, update),
                Command::Stop => break,
            }
        }

        tracing::info!("Tracer cache stopped");
    }

    async fn load(&mut self, uuid: &str) -> Result<&Vec<Request>, CacheError> {
        if !self.tracers.contains_key(uuid) {
            let requests = self
                .store
                .get_requests_by_uuid(uuid)
                .await
                .map_err(|source| {
                    tracing::error!(uuid = %uuid, error = %source, "Tracer cache cold load failed");
                    CacheError::Unavailable {
                        uuid: uuid.to_string(),
                        source,
                    }
                })?;

            self.stats.cold_loads.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(uuid = %uuid, requests = requests.len(), "Cold loaded session");
            self.tracers.insert(uuid.to_string(), requests);
            self.tracers_json.remove(uuid);
        }
        Ok(&self.tracers[uuid])
    }

    async fn load_json(&mut self, uuid: &str) -> Result<Bytes, CacheError> {
        self.load(uuid).await?;

        if let Some(json) = self.tracers_json.get(uuid) {
            return Ok(json.clone());
        }

        match serde_json::to_vec(&self.tracers[uuid]) {
            Ok(encoded) => {
                let json = Bytes::from(encoded);
                self.tracers_json.insert(uuid.to_string(), json.clone());
                Ok(json)
            }
            Err(e) => {
                tracing::warn!(uuid = %uuid, error = %e, "Failed to encode cached tracers");
                Ok(Bytes::new())
            }
        }
    }

    fn apply(&mut self, uuid: &str, update: CacheUpdate) {
        let Some(requests) = self.tracers.get_mut(uuid) else {
            self.stats.uncached_updates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(uuid = %uuid, "Update for uncached session left to the next cold load");
            return;
        };

        match update {
            // A cold load racing the write may already have installed this row
            CacheUpdate::Append(request) if requests.iter().any(|r| r.id == request.id) => {
                tracing::debug!(uuid = %uuid, request_id = request.id, "Request already cached");
                return;
            }
            CacheUpdate::Append(request) => requests.push(request),
            CacheUpdate::Screenshot {
                tracer_id,
                screenshot,
            } => {
                let target = requests
                    .iter_mut()
                    .flat_map(|r| r.tracers.iter_mut())
                    .find(|t| t.id == tracer_id);
                match target {
                    Some(tracer) => tracer.screenshot = screenshot,
                    None => {
                        self.stats
                            .unmatched_screenshot_updates
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(uuid = %uuid, tracer_id, "Screenshot update matched no cached tracer");
                        return;
                    }
                }
            }
        }

        self.tracers_json.remove(uuid);
    }
}

// ============================================================================
// TESTS
// ============================================================================
