//! The worker pool: a fixed set of long-lived workers over one bounded queue.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tc_av::Encoder;
use tc_core::config::TranscodeConfig;
use tc_core::events::EventBus;
use tc_core::{RenditionKey, Result, TranscodeJobId};
use tc_db::pool::DbPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{self, JobQueue, Ticket};
use crate::worker;

/// Sizing and failure policy for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Number of workers, and so the maximum number of concurrent encodes.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Delete whatever the encoder left behind when an attempt fails.
    pub cleanup_failed_outputs: bool,
}

impl PoolOptions {
    /// Zero workers or capacity in the config are raised to 1.
    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        Self {
            workers: cfg.workers.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            cleanup_failed_outputs: cfg.cleanup_failed_outputs,
        }
    }
}

/// An encode currently running for a pair.
#[derive(Debug, Clone)]
pub(crate) struct ActiveEncode {
    pub attempt: u32,
    pub cancel: CancellationToken,
}

/// State shared by every worker of one pool.
pub(crate) struct PoolShared {
    pub db: DbPool,
    pub encoder: Arc<dyn Encoder>,
    pub events: Arc<EventBus>,
    pub cleanup_failed_outputs: bool,
    /// Root token; every encode runs under a child of it.
    pub shutdown: CancellationToken,
    pub active: DashMap<RenditionKey, ActiveEncode>,
    /// One lock per pair so a superseded encode never overlaps its successor.
    pub pair_locks: DashMap<RenditionKey, Arc<tokio::sync::Mutex<()>>>,
    /// Jobs with a ticket handed to the queue that no worker has taken yet.
    pub ticketed: DashSet<TranscodeJobId>,
}

/// A running pool of transcode workers.
///
/// Constructed explicitly and owned by its caller; independent pools share
/// nothing.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    queue: JobQueue,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the workers on the current tokio runtime.
    pub fn start(
        opts: PoolOptions,
        db: DbPool,
        encoder: Arc<dyn Encoder>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        if opts.workers == 0 {
            return Err(tc_core::Error::Validation(
                "worker count must be at least 1".into(),
            ));
        }
        let (queue, rx) = queue::bounded(opts.queue_capacity)?;

        let shared = Arc::new(PoolShared {
            db,
            encoder,
            events,
            cleanup_failed_outputs: opts.cleanup_failed_outputs,
            shutdown: CancellationToken::new(),
            active: DashMap::new(),
            pair_locks: DashMap::new(),
            ticketed: DashSet::new(),
        });

        let handles = (0..opts.workers)
            .map(|id| tokio::spawn(worker::run_worker(id, shared.clone(), rx.clone())))
            .collect();

        tracing::info!(
            workers = opts.workers,
            queue_capacity = opts.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            shared,
            queue,
            workers: opts.workers,
            handles: Mutex::new(handles),
        })
    }

    /// Enqueue a ticket without waiting.
    ///
    /// Fails with [`tc_core::Error::QueueFull`] when every slot is taken and
    /// with [`tc_core::Error::Cancelled`] once the pool is shutting down.
    pub fn submit(&self, ticket: Ticket) -> Result<()> {
        if self.is_shut_down() {
            return Err(tc_core::Error::Cancelled(
                "worker pool is shutting down".into(),
            ));
        }
        let job_id = ticket.job_id;
        self.shared.ticketed.insert(job_id);
        let pushed = self.queue.push(ticket);
        if pushed.is_err() {
            self.shared.ticketed.remove(&job_id);
        }
        pushed
    }

    /// Enqueue tickets in the background, waiting for free slots as workers
    /// drain the queue. Used to re-queue work recovered at startup, which may
    /// exceed the queue capacity.
    pub fn submit_backlog(&self, tickets: Vec<Ticket>) {
        if tickets.is_empty() {
            return;
        }
        for ticket in &tickets {
            self.shared.ticketed.insert(ticket.job_id);
        }
        let queue = self.queue.clone();
        let shutdown = self.shared.shutdown.clone();
        let handle = tokio::spawn(async move {
            let total = tickets.len();
            for (n, ticket) in tickets.into_iter().enumerate() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::debug!(queued = n, total, "Backlog feed interrupted by shutdown");
                        return;
                    }
                    res = queue.push_wait(ticket) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
            tracing::debug!(total, "Backlog fully queued");
        });
        self.handles.lock().push(handle);
    }

    /// Cancel any encode for `key` started by an attempt older than
    /// `attempt`.
    pub fn supersede(&self, key: &RenditionKey, attempt: u32) {
        if let Some(active) = self.shared.active.get(key) {
            if active.attempt < attempt {
                tracing::info!(
                    key = %key,
                    old_attempt = active.attempt,
                    new_attempt = attempt,
                    "Cancelling superseded encode"
                );
                active.cancel.cancel();
            }
        }
    }

    /// Whether a ticket for `job_id` is waiting to be picked up by a worker.
    pub fn has_ticket(&self, job_id: TranscodeJobId) -> bool {
        self.shared.ticketed.contains(&job_id)
    }

    /// Number of encodes running right now.
    pub fn active_encodes(&self) -> usize {
        self.shared.active.len()
    }

    /// Number of tickets waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Cancel in-flight encodes and wait for every worker to exit.
    ///
    /// When this returns, no encoder process started by the pool is still
    /// running. Tickets still queued are dropped; their jobs stay pending
    /// and are picked up again on the next start. Calling it twice is
    /// harmless.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {e}");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.queue.capacity())
            .field("active_encodes", &self.shared.active.len())
            .finish()
    }
}
