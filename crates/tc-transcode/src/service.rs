//! The transcoding service: the one entry point callers use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tc_av::Encoder;
use tc_core::config::TranscodeConfig;
use tc_core::events::{Event, EventBus, EventPayload};
use tc_core::{presets, Error, JobStatus, RenditionKey, Result, TranscodeJobId, VideoId};
use tc_db::models::{Rendition, TranscodeJob};
use tc_db::pool::{get_conn, DbPool};
use tc_db::queries::outcomes::Registration;
use tc_db::queries::{jobs, outcomes, renditions};
use tokio::sync::broadcast;

use crate::pool::{PoolOptions, WorkerPool};
use crate::queue::Ticket;

/// Whether a starting service picks up work left behind by earlier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Reset jobs orphaned in `processing` and re-queue every pending job.
    Resume,
    /// Leave existing rows alone; only jobs submitted to this instance run.
    Skip,
}

/// Façade over the store and the worker pool.
///
/// Submission only creates or resets records and enqueues work; every later
/// status transition is written by the workers.
pub struct TranscodingService {
    db: DbPool,
    pool: WorkerPool,
    events: Arc<EventBus>,
    output_dir: PathBuf,
}

impl TranscodingService {
    /// Start the worker pool and recover unfinished work.
    ///
    /// Jobs a previous process left in `processing` are reset to pending,
    /// then every pending job is queued again.
    pub async fn start(cfg: &TranscodeConfig, db: DbPool, encoder: Arc<dyn Encoder>) -> Result<Self> {
        Self::start_with(cfg, db, encoder, Recovery::Resume).await
    }

    /// Start the worker pool, recovering earlier work only with
    /// [`Recovery::Resume`].
    pub async fn start_with(
        cfg: &TranscodeConfig,
        db: DbPool,
        encoder: Arc<dyn Encoder>,
        recovery: Recovery,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.output_dir).await?;

        let backlog = match recovery {
            Recovery::Resume => {
                let conn = get_conn(&db)?;
                let orphaned = jobs::reset_orphaned_jobs(&conn)?;
                if orphaned > 0 {
                    tracing::warn!(count = orphaned, "Reset interrupted transcode jobs to pending");
                }
                jobs::list_pending(&conn)?
            }
            Recovery::Skip => Vec::new(),
        };

        let events = Arc::new(EventBus::default());
        let pool = WorkerPool::start(
            PoolOptions::from_config(cfg),
            db.clone(),
            encoder,
            events.clone(),
        )?;

        if !backlog.is_empty() {
            tracing::info!(count = backlog.len(), "Re-queuing pending transcode jobs");
            pool.submit_backlog(backlog.iter().map(Ticket::for_job).collect());
        }

        Ok(Self {
            db,
            pool,
            events,
            output_dir: cfg.output_dir.clone(),
        })
    }

    /// Queue `source_path` for encoding into each of `qualities`.
    ///
    /// Unknown labels do not abort the batch: their job and rendition are
    /// recorded as failed straight away and nothing is enqueued for them.
    /// Returns the job record of every requested quality.
    ///
    /// # Errors
    ///
    /// - A store failure, in which case the batch must be treated as not
    ///   reliably queued.
    /// - [`Error::QueueFull`] when the queue has no free slot. The pair that
    ///   did not fit is recorded as failed and later qualities in the batch
    ///   are not submitted.
    /// - [`Error::Cancelled`] after [`shutdown`](Self::shutdown).
    pub fn queue_transcoding(
        &self,
        video_id: VideoId,
        source_path: &Path,
        qualities: &[impl AsRef<str>],
    ) -> Result<Vec<TranscodeJob>> {
        if self.pool.is_shut_down() {
            return Err(Error::Cancelled(
                "transcoding service is shut down".into(),
            ));
        }

        let source = source_path.to_string_lossy();
        let mut submitted = Vec::with_capacity(qualities.len());

        for quality in qualities {
            let quality = quality.as_ref();
            let reg = match register(&self.db, &self.output_dir, video_id, &source, quality)? {
                Registered::Rejected(job, e) => {
                    self.emit_failed(&job, &e);
                    submitted.push(job);
                    continue;
                }
                Registered::Pending(reg) => reg,
            };
            let job = reg.job;
            let key = job.key();

            self.events.broadcast(EventPayload::TranscodeQueued {
                job_id: job.id,
                video_id,
                quality: quality.to_string(),
            });

            match reg.previous {
                // Its ticket is still in the queue and will pick up the reset row.
                Some(JobStatus::Pending) if self.pool.has_ticket(job.id) => {
                    submitted.push(job);
                    continue;
                }
                Some(JobStatus::Processing) => self.pool.supersede(&key, job.attempts),
                _ => {}
            }

            if let Err(e) = self.pool.submit(Ticket::for_job(&job)) {
                tracing::warn!(job_id = %job.id, key = %key, "Could not enqueue transcode: {e}");
                let conn = get_conn(&self.db)?;
                outcomes::record_failure(&conn, job.id, job.attempts, &key, &e.to_string())?;
                drop(conn);
                self.emit_failed(&job, &e);
                return Err(e);
            }
            submitted.push(job);
        }

        Ok(submitted)
    }

    /// Ready renditions of a video, highest resolution first.
    pub fn get_video_qualities(&self, video_id: VideoId) -> Result<Vec<Rendition>> {
        let conn = get_conn(&self.db)?;
        renditions::list_ready_by_video(&conn, video_id)
    }

    /// Every job of a video in any status, most recently submitted first.
    pub fn get_transcoding_status(&self, video_id: VideoId) -> Result<Vec<TranscodeJob>> {
        let conn = get_conn(&self.db)?;
        jobs::list_by_video(&conn, video_id)
    }

    pub fn get_job(&self, id: TranscodeJobId) -> Result<TranscodeJob> {
        let conn = get_conn(&self.db)?;
        jobs::get_job(&conn, id)?.ok_or_else(|| Error::not_found("transcode job", id))
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Where the rendition for `key` is written.
    pub fn output_path(&self, key: &RenditionKey) -> PathBuf {
        output_path(&self.output_dir, key)
    }

    /// Kill in-flight encodes and wait for every worker to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down transcoding service");
        self.pool.shutdown().await;
    }

    fn emit_failed(&self, job: &TranscodeJob, err: &Error) {
        self.events.broadcast(EventPayload::TranscodeFailed {
            job_id: job.id,
            video_id: job.video_id,
            quality: job.target_quality.clone(),
            error: err.to_string(),
            cancelled: err.is_cancelled(),
        });
    }
}

/// Record `qualities` of `source_path` as pending without encoding anything.
///
/// No worker runs; the jobs are picked up by the next service started with
/// [`Recovery::Resume`]. Unknown labels are recorded as failed, as
/// [`TranscodingService::queue_transcoding`] does.
pub fn record_pending(
    db: &DbPool,
    output_dir: &Path,
    video_id: VideoId,
    source_path: &Path,
    qualities: &[impl AsRef<str>],
) -> Result<Vec<TranscodeJob>> {
    let source = source_path.to_string_lossy();
    let mut recorded = Vec::with_capacity(qualities.len());
    for quality in qualities {
        let job = match register(db, output_dir, video_id, &source, quality.as_ref())? {
            Registered::Rejected(job, _) => job,
            Registered::Pending(reg) => reg.job,
        };
        recorded.push(job);
    }
    Ok(recorded)
}

fn output_path(output_dir: &Path, key: &RenditionKey) -> PathBuf {
    output_dir.join(key.file_name())
}

/// What [`register`] wrote for one requested quality.
enum Registered {
    /// Unknown label; both records are already failed.
    Rejected(TranscodeJob, Error),
    Pending(Registration),
}

/// Create or reset the job and rendition for one pair.
fn register(
    db: &DbPool,
    output_dir: &Path,
    video_id: VideoId,
    source: &str,
    quality: &str,
) -> Result<Registered> {
    let output = output_path(output_dir, &RenditionKey::new(video_id, quality));
    let output = output.to_string_lossy();
    let conn = get_conn(db)?;

    let preset = match presets::resolve(quality) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(video_id = %video_id, quality, "Skipping unknown quality: {e}");
            let job =
                outcomes::register_rejected(&conn, video_id, quality, source, &output, &e.to_string())?;
            return Ok(Registered::Rejected(job, e));
        }
    };

    let reg = outcomes::register_pending(&conn, video_id, quality, source, &output, preset.into())?;
    tracing::info!(
        job_id = %reg.job.id,
        video_id = %video_id,
        quality,
        attempt = reg.job.attempts,
        "Queued transcode"
    );
    Ok(Registered::Pending(reg))
}

impl std::fmt::Debug for TranscodingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodingService")
            .field("pool", &self.pool)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tc_av::{EncodeOutput, EncodeRequest};
    use tc_core::RenditionStatus;
    use tc_db::pool::init_memory_pool;
    use tokio_util::sync::CancellationToken;

    /// Writes a few bytes, or blocks until cancelled when `block` is set.
    #[derive(Default)]
    struct ScriptedEncoder {
        block: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Encoder for ScriptedEncoder {
        async fn encode(
            &self,
            req: &EncodeRequest,
            cancel: &CancellationToken,
        ) -> Result<EncodeOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.block {
                cancel.cancelled().await;
                return Err(Error::Cancelled("encoder killed".into()));
            }
            tokio::fs::write(&req.dest, req.preset.label.as_bytes()).await?;
            Ok(EncodeOutput::default())
        }
    }

    fn config(dir: &Path, workers: usize) -> TranscodeConfig {
        TranscodeConfig {
            output_dir: dir.join("renditions"),
            workers,
            ..TranscodeConfig::default()
        }
    }

    async fn wait_terminal(svc: &TranscodingService, video: VideoId, n: usize) -> Vec<TranscodeJob> {
        for _ in 0..200 {
            let jobs = svc.get_transcoding_status(video).unwrap();
            if jobs.len() == n && jobs.iter().all(|j| j.status.is_terminal()) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs for video {video} did not finish");
    }

    #[tokio::test]
    async fn batch_completes_best_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let encoder = Arc::new(ScriptedEncoder::default());
        let svc = TranscodingService::start(&config(dir.path(), 2), db, encoder.clone())
            .await
            .unwrap();

        let video = VideoId::new(42);
        let queued = svc
            .queue_transcoding(video, Path::new("/uploads/42.mp4"), &["240p", "1080p"])
            .unwrap();
        assert_eq!(queued.len(), 2);

        let jobs = wait_terminal(&svc, video, 2).await;
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed && j.progress == 100));

        let ready = svc.get_video_qualities(video).unwrap();
        let labels: Vec<_> = ready.iter().map(|r| r.quality.as_str()).collect();
        assert_eq!(labels, ["1080p", "240p"]);
        for r in &ready {
            assert_eq!(r.status, RenditionStatus::Ready);
            assert!(r.file_size_bytes.unwrap() > 0);
            assert!(Path::new(&r.output_location).exists());
        }
        assert_eq!(
            ready[0].output_location,
            dir.path()
                .join("renditions/video_42_1080p.mp4")
                .to_string_lossy()
        );
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);

        svc.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_quality_fails_without_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let encoder = Arc::new(ScriptedEncoder::default());
        let svc = TranscodingService::start(&config(dir.path(), 1), db, encoder.clone())
            .await
            .unwrap();

        let video = VideoId::new(7);
        let jobs = svc
            .queue_transcoding(video, Path::new("/uploads/7.mp4"), &["bogus"])
            .unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(
            jobs[0].error_message.as_deref(),
            Some("quality preset not found: bogus")
        );
        assert!(svc.get_video_qualities(video).unwrap().is_empty());

        svc.shutdown().await;
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_encode() {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let encoder = Arc::new(ScriptedEncoder {
            block: true,
            ..Default::default()
        });
        let svc = TranscodingService::start(&config(dir.path(), 1), db, encoder.clone())
            .await
            .unwrap();

        let video = VideoId::new(3);
        svc.queue_transcoding(video, Path::new("/uploads/3.mp4"), &["720p"])
            .unwrap();
        for _ in 0..200 {
            if svc.pool().active_encodes() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(svc.pool().active_encodes(), 1);

        svc.shutdown().await;
        assert_eq!(svc.pool().active_encodes(), 0);

        let job = &svc.get_transcoding_status(video).unwrap()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("cancelled: service shutting down")
        );

        let err = svc
            .queue_transcoding(video, Path::new("/uploads/3.mp4"), &["720p"])
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn zero_workers_in_config_still_process() {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let svc = TranscodingService::start(
            &config(dir.path(), 0),
            db,
            Arc::new(ScriptedEncoder::default()),
        )
        .await
        .unwrap();
        assert_eq!(svc.pool().workers(), 1);

        let video = VideoId::new(5);
        svc.queue_transcoding(video, Path::new("/uploads/5.mp4"), &["360p"])
            .unwrap();
        let jobs = wait_terminal(&svc, video, 1).await;
        assert_eq!(jobs[0].status, JobStatus::Completed);
        svc.shutdown().await;
    }
}
