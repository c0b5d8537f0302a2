//! Background upkeep bound to the retriever's lifetime.
//!
//! One tokio task owns the slow, write-side work: periodic snapshots when the
//! index changed, document-removal rebuilds requested over a channel, and
//! cache sweeps. It stops on a shutdown signal after a final flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::chunk::DocumentId;
use crate::error::{PilumError, Result};
use crate::hybrid::cache::ResultCache;
use crate::hybrid::types::CachedAnswer;
use crate::lexical::SparseIndex;
use crate::storage::Storage;

const REQUEST_QUEUE_DEPTH: usize = 64;

/// Where snapshots go.
#[derive(Debug, Clone)]
pub struct PersistTarget {
    pub storage: Arc<dyn Storage>,
    pub name: String,
}

impl PersistTarget {
    pub fn new(storage: Arc<dyn Storage>, name: impl Into<String>) -> Self {
        PersistTarget {
            storage,
            name: name.into(),
        }
    }

    /// Write a snapshot on the blocking pool and return its generation.
    pub async fn persist(&self, index: &Arc<SparseIndex>) -> Result<u64> {
        let index = Arc::clone(index);
        let storage = Arc::clone(&self.storage);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || index.persist(storage.as_ref(), &name)).await?
    }

    /// Like [`PersistTarget::persist`], but skipped when nothing changed.
    pub async fn persist_if_dirty(&self, index: &Arc<SparseIndex>) -> Result<Option<u64>> {
        let index = Arc::clone(index);
        let storage = Arc::clone(&self.storage);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || index.persist_if_dirty(storage.as_ref(), &name))
            .await?
    }

    /// Size of the last written snapshot, if there is one.
    pub fn snapshot_size(&self) -> Option<u64> {
        self.storage.file_size(&self.name).ok()
    }
}

/// Timing of the maintenance loop.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceSettings {
    pub persist_interval: Duration,
    /// `None` disables the cache sweep.
    pub sweep_interval: Option<Duration>,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        MaintenanceSettings {
            persist_interval: Duration::from_secs(60 * 60),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Work submitted to the maintenance task.
#[derive(Debug)]
pub enum MaintenanceRequest {
    /// Remove a document by rebuild; replies whether it was present.
    Rebuild {
        document_id: DocumentId,
        reply: oneshot::Sender<Result<bool>>,
    },
    /// Snapshot now, even if nothing changed.
    Persist { reply: oneshot::Sender<Result<u64>> },
}

/// Counters kept by the maintenance task.
#[derive(Debug, Default)]
pub struct MaintenanceCounters {
    persists: AtomicU64,
    persist_failures: AtomicU64,
    rebuilds: AtomicU64,
    sweeps: AtomicU64,
    swept_entries: AtomicU64,
}

/// Snapshot of [`MaintenanceCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    pub persists: u64,
    pub persist_failures: u64,
    pub rebuilds: u64,
    pub sweeps: u64,
    pub swept_entries: u64,
}

impl MaintenanceCounters {
    pub fn snapshot(&self) -> MaintenanceStats {
        MaintenanceStats {
            persists: self.persists.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            swept_entries: self.swept_entries.load(Ordering::Relaxed),
        }
    }
}

/// Shared state the maintenance task works on.
#[derive(Debug, Clone)]
pub struct MaintenanceContext {
    pub index: Arc<SparseIndex>,
    pub cache: Arc<ResultCache<CachedAnswer>>,
    pub persistence: Option<PersistTarget>,
}

/// Cloneable sender side of the request channel.
#[derive(Debug, Clone)]
pub struct MaintenanceClient {
    requests: mpsc::Sender<MaintenanceRequest>,
}

impl MaintenanceClient {
    /// Queue a rebuild without `document_id` and wait until it is swapped in.
    pub async fn rebuild(&self, document_id: DocumentId) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.submit(MaintenanceRequest::Rebuild { document_id, reply })
            .await?;
        response
            .await
            .map_err(|_| PilumError::cancelled("maintenance task dropped the rebuild request"))?
    }

    /// Snapshot immediately and return the generation written.
    pub async fn persist(&self) -> Result<u64> {
        let (reply, response) = oneshot::channel();
        self.submit(MaintenanceRequest::Persist { reply }).await?;
        response
            .await
            .map_err(|_| PilumError::cancelled("maintenance task dropped the persist request"))?
    }

    async fn submit(&self, request: MaintenanceRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| PilumError::cancelled("maintenance task is not running"))
    }
}

/// Owner of a running maintenance task. Dropping it stops the task after a
/// final flush, the same as [`MaintenanceHandle::shutdown`] minus the wait.
#[derive(Debug)]
pub struct MaintenanceHandle {
    client: MaintenanceClient,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    counters: Arc<MaintenanceCounters>,
}

impl MaintenanceHandle {
    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(context: MaintenanceContext, settings: MaintenanceSettings) -> Self {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(MaintenanceCounters::default());

        let task = tokio::spawn(run(
            context,
            settings,
            receiver,
            shutdown_rx,
            Arc::clone(&counters),
        ));

        MaintenanceHandle {
            client: MaintenanceClient { requests },
            shutdown,
            task,
            counters,
        }
    }

    pub fn client(&self) -> MaintenanceClient {
        self.client.clone()
    }

    pub async fn rebuild(&self, document_id: DocumentId) -> Result<bool> {
        self.client.rebuild(document_id).await
    }

    pub async fn persist(&self) -> Result<u64> {
        self.client.persist().await
    }

    pub fn stats(&self) -> MaintenanceStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal shutdown and wait for the final flush.
    pub async fn shutdown(self) -> Result<()> {
        // An error means the task already exited.
        let _ = self.shutdown.send(true);
        self.task.await?;
        Ok(())
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run(
    context: MaintenanceContext,
    settings: MaintenanceSettings,
    mut requests: mpsc::Receiver<MaintenanceRequest>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<MaintenanceCounters>,
) {
    let mut persist_ticker = context
        .persistence
        .as_ref()
        .map(|_| ticker(settings.persist_interval));
    let mut sweep_ticker = settings.sweep_interval.map(ticker);

    debug!(
        "Maintenance started: persist every {:?}, sweep every {:?}",
        settings.persist_interval, settings.sweep_interval
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            request = requests.recv() => match request {
                Some(request) => handle_request(&context, &counters, request).await,
                None => break,
            },
            _ = tick(&mut persist_ticker) => {
                persist_scheduled(&context, &counters).await;
            }
            _ = tick(&mut sweep_ticker) => {
                let removed = context.cache.purge_expired();
                counters.sweeps.fetch_add(1, Ordering::Relaxed);
                counters.swept_entries.fetch_add(removed as u64, Ordering::Relaxed);
                if removed > 0 {
                    debug!("Swept {removed} expired cache entries");
                }
            }
        }
    }

    // Rebuilds already queued still get an answer.
    requests.close();
    while let Some(request) = requests.recv().await {
        handle_request(&context, &counters, request).await;
    }

    if let Some(target) = &context.persistence {
        match target.persist_if_dirty(&context.index).await {
            Ok(Some(generation)) => {
                counters.persists.fetch_add(1, Ordering::Relaxed);
                info!("Final snapshot written at generation {generation}");
            }
            Ok(None) => debug!("Index unchanged since last snapshot; no final flush needed"),
            Err(err) => {
                counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Final snapshot failed: {err}");
            }
        }
    }
    debug!("Maintenance stopped");
}

async fn persist_scheduled(context: &MaintenanceContext, counters: &MaintenanceCounters) {
    let Some(target) = &context.persistence else {
        return;
    };
    match target.persist_if_dirty(&context.index).await {
        Ok(Some(generation)) => {
            counters.persists.fetch_add(1, Ordering::Relaxed);
            debug!("Scheduled snapshot written at generation {generation}");
        }
        Ok(None) => {}
        Err(err) => {
            counters.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Scheduled snapshot failed, retrying next interval: {err}");
        }
    }
}

async fn handle_request(
    context: &MaintenanceContext,
    counters: &MaintenanceCounters,
    request: MaintenanceRequest,
) {
    match request {
        MaintenanceRequest::Rebuild { document_id, reply } => {
            let result = rebuild(context, document_id).await;
            if matches!(result, Ok(true)) {
                counters.rebuilds.fetch_add(1, Ordering::Relaxed);
            }
            // The requester may have given up waiting.
            let _ = reply.send(result);
        }
        MaintenanceRequest::Persist { reply } => {
            let result = match &context.persistence {
                Some(target) => target.persist(&context.index).await,
                None => Err(PilumError::invalid_config(
                    "no snapshot location configured",
                )),
            };
            match &result {
                Ok(_) => {
                    counters.persists.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Requested snapshot failed: {err}");
                }
            }
            let _ = reply.send(result);
        }
    }
}

/// Remove a document from the index and drop cached answers that may
/// reference it.
pub(crate) async fn rebuild(context: &MaintenanceContext, document_id: DocumentId) -> Result<bool> {
    let index = Arc::clone(&context.index);
    let removed =
        tokio::task::spawn_blocking(move || index.remove_document(&document_id)).await?;
    if removed {
        context.cache.clear();
    }
    Ok(removed)
}
