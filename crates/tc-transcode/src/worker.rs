//! A single worker: take a ticket, claim its job, encode, record the outcome.

use std::path::Path;
use std::sync::Arc;

use tc_av::EncodeRequest;
use tc_core::events::EventPayload;
use tc_core::{presets, Error, RenditionKey, Result};
use tc_db::models::TranscodeJob;
use tc_db::pool::get_conn;
use tc_db::queries::{jobs, outcomes};

use crate::pool::{ActiveEncode, PoolShared};
use crate::queue::{SharedReceiver, Ticket};

/// Worker loop. Runs until the pool's shutdown token fires.
pub(crate) async fn run_worker(worker: usize, shared: Arc<PoolShared>, rx: SharedReceiver) {
    tracing::debug!(worker, "Transcode worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => None,
            ticket = async { rx.lock().await.recv().await } => ticket,
        };
        let Some(ticket) = next else {
            break;
        };
        shared.ticketed.remove(&ticket.job_id);

        if let Err(e) = process_ticket(worker, &shared, ticket).await {
            // Only store failures get here; the job keeps whatever state was
            // last written and the worker moves on.
            tracing::error!(worker, "Transcode worker error: {e}");
        }
    }

    tracing::debug!(worker, "Transcode worker stopped");
}

/// Serialize on the pair, then run the ticket.
async fn process_ticket(worker: usize, shared: &PoolShared, ticket: Ticket) -> Result<()> {
    let key = ticket.key.clone();
    let lock = shared.pair_locks.entry(key.clone()).or_default().clone();

    let result = {
        let _guard = lock.lock().await;
        process_locked(worker, shared, &ticket).await
    };

    drop(lock);
    shared
        .pair_locks
        .remove_if(&key, |_, l| Arc::strong_count(l) == 1);
    result
}

async fn process_locked(worker: usize, shared: &PoolShared, ticket: &Ticket) -> Result<()> {
    if shared.shutdown.is_cancelled() {
        // Left pending; the next start re-queues it.
        return Ok(());
    }

    let claimed = {
        let conn = get_conn(&shared.db)?;
        jobs::mark_processing(&conn, ticket.job_id)?
    };
    let Some(job) = claimed else {
        tracing::debug!(job_id = %ticket.job_id, key = %ticket.key, "Skipping stale ticket");
        return Ok(());
    };
    let key = job.key();

    tracing::info!(
        worker,
        job_id = %job.id,
        video_id = %job.video_id,
        quality = %job.target_quality,
        attempt = job.attempts,
        "Processing transcode job"
    );
    shared.events.broadcast(EventPayload::TranscodeStarted {
        job_id: job.id,
        video_id: job.video_id,
        quality: job.target_quality.clone(),
        worker,
    });

    let cancel = shared.shutdown.child_token();
    shared.active.insert(
        key.clone(),
        ActiveEncode {
            attempt: job.attempts,
            cancel: cancel.clone(),
        },
    );

    let outcome = encode(shared, &job, &cancel).await;

    shared
        .active
        .remove_if(&key, |_, a| a.attempt == job.attempts);

    match outcome {
        Ok(size) => record_success(shared, &job, &key, size),
        Err(e) => {
            let e = if e.is_cancelled() && shared.shutdown.is_cancelled() {
                Error::Cancelled("service shutting down".into())
            } else {
                e
            };
            if shared.cleanup_failed_outputs {
                remove_partial_output(Path::new(&job.output_path)).await;
            }
            record_failure(shared, &job, &key, &e)
        }
    }
}

/// Run the encoder and return the size of the artifact it produced.
async fn encode(
    shared: &PoolShared,
    job: &TranscodeJob,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<u64> {
    let preset = presets::resolve(&job.target_quality)?;
    let dest = Path::new(&job.output_path);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let req = EncodeRequest {
        source: job.source_path.clone().into(),
        dest: dest.to_path_buf(),
        preset,
    };
    let output = shared.encoder.encode(&req, cancel).await?;
    if let Some(summary) = output.summary() {
        tracing::debug!(job_id = %job.id, "Encoder finished: {summary}");
    }

    let size = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            return Err(Error::Validation(format!(
                "encoder reported success but {} is missing: {e}",
                dest.display()
            )))
        }
    };
    if size == 0 {
        return Err(Error::Validation(format!(
            "encoder reported success but {} is empty",
            dest.display()
        )));
    }
    Ok(size)
}

fn record_success(
    shared: &PoolShared,
    job: &TranscodeJob,
    key: &RenditionKey,
    size: u64,
) -> Result<()> {
    let conn = get_conn(&shared.db)?;
    if !outcomes::record_success(&conn, job.id, job.attempts, key, size)? {
        tracing::info!(job_id = %job.id, key = %key, "Encode finished for a superseded attempt");
        return Ok(());
    }
    drop(conn);

    tracing::info!(job_id = %job.id, key = %key, file_size = size, "Transcode completed");
    shared.events.broadcast(EventPayload::TranscodeCompleted {
        job_id: job.id,
        video_id: job.video_id,
        quality: job.target_quality.clone(),
        file_size: size,
    });
    Ok(())
}

fn record_failure(
    shared: &PoolShared,
    job: &TranscodeJob,
    key: &RenditionKey,
    err: &Error,
) -> Result<()> {
    let reason = err.diagnostic();
    let conn = get_conn(&shared.db)?;
    if !outcomes::record_failure(&conn, job.id, job.attempts, key, &reason)? {
        tracing::info!(job_id = %job.id, key = %key, "Superseded attempt ended: {err}");
        return Ok(());
    }
    drop(conn);

    if err.is_cancelled() {
        tracing::warn!(job_id = %job.id, key = %key, "Transcode cancelled: {err}");
    } else {
        tracing::error!(job_id = %job.id, key = %key, error = %err, "Transcode failed");
    }
    shared.events.broadcast(EventPayload::TranscodeFailed {
        job_id: job.id,
        video_id: job.video_id,
        quality: job.target_quality.clone(),
        error: reason,
        cancelled: err.is_cancelled(),
    });
    Ok(())
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove partial output: {e}"),
    }
}
