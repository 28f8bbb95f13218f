//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a scratch directory, an in-memory
//! DB and a [`FakeEncoder`], and starts [`TranscodingService`] instances
//! over them. Restarting against the same harness reuses the database, the
//! way a process restart would.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tc_av::{EncodeOutput, EncodeRequest, Encoder};
use tc_core::config::TranscodeConfig;
use tc_core::{Error, Result, VideoId};
use tc_db::models::TranscodeJob;
use tc_db::pool::{init_memory_pool, DbPool};
use tc_transcode::{Recovery, TranscodingService};

/// Scripted stand-in for ffmpeg, driven by the source file name:
///
/// - `corrupt*`: writes a partial output, then fails with encoder output
/// - `hang*`: runs until cancelled
/// - `empty*`: "succeeds" without writing anything
/// - anything else: writes the preset label to the destination
pub struct FakeEncoder {
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeEncoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self, req: &EncodeRequest, cancel: &CancellationToken) -> Result<EncodeOutput> {
        let name = req
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if name.starts_with("hang") {
            cancel.cancelled().await;
            return Err(Error::Cancelled("encoder killed".into()));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled("encoder killed".into())),
        }

        if name.starts_with("corrupt") {
            tokio::fs::write(&req.dest, b"partial").await?;
            return Err(Error::Encode {
                status: "exit status: 1".into(),
                output: format!(
                    "{}: Invalid data found when processing input\n",
                    req.source.display()
                ),
            });
        }
        if name.starts_with("empty") {
            return Ok(EncodeOutput::default());
        }

        tokio::fs::write(&req.dest, req.preset.label.as_bytes()).await?;
        Ok(EncodeOutput::default())
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, req: &EncodeRequest, cancel: &CancellationToken) -> Result<EncodeOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = self.run(req, cancel).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct TestHarness {
    pub dir: TempDir,
    pub db: DbPool,
    pub encoder: Arc<FakeEncoder>,
    pub config: TranscodeConfig,
}

impl TestHarness {
    /// Harness with `workers` workers and a short simulated encode time.
    pub fn new(workers: usize) -> Self {
        Self::with_delay(workers, Duration::from_millis(20))
    }

    pub fn with_delay(workers: usize, delay: Duration) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = TranscodeConfig {
            output_dir: dir.path().join("renditions"),
            workers,
            ..TranscodeConfig::default()
        };
        Self {
            db: init_memory_pool().expect("failed to create in-memory pool"),
            encoder: Arc::new(FakeEncoder::new(delay)),
            config,
            dir,
        }
    }

    pub async fn start(&self) -> TranscodingService {
        self.start_with(Recovery::Resume).await
    }

    pub async fn start_with(&self, recovery: Recovery) -> TranscodingService {
        TranscodingService::start_with(&self.config, self.db.clone(), self.encoder.clone(), recovery)
            .await
            .expect("failed to start transcoding service")
    }

    /// A source path under the scratch dir; the name selects the fake
    /// encoder's behaviour.
    pub fn source(&self, name: &str) -> PathBuf {
        self.dir.path().join("uploads").join(name)
    }

    pub fn output(&self, video: i64, quality: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("video_{video}_{quality}.mp4"))
    }
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until `video` has `n` jobs, all terminal, and return them.
pub async fn wait_for_terminal(
    svc: &TranscodingService,
    video: VideoId,
    n: usize,
) -> Vec<TranscodeJob> {
    wait_until(&format!("{n} terminal jobs for video {video}"), || {
        let jobs = svc.get_transcoding_status(video).unwrap();
        jobs.len() == n && jobs.iter().all(|j| j.status.is_terminal())
    })
    .await;
    svc.get_transcoding_status(video).unwrap()
}
