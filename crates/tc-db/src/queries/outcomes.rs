//! Paired job + rendition writes.
//!
//! Every transition that touches both records runs inside one IMMEDIATE
//! transaction, so a status query sees either both writes or neither.

use rusqlite::Connection;
use tc_core::{Error, JobStatus, RenditionKey, Result, TranscodeJobId, VideoId};

use super::renditions::RenditionSpec;
use super::{immediate, jobs, renditions};
use crate::models::{Rendition, TranscodeJob};

/// Result of registering a pair as pending.
#[derive(Debug, Clone)]
pub struct Registration {
    pub job: TranscodeJob,
    pub rendition: Rendition,
    /// Status of the job before this registration reset it, if it existed.
    pub previous: Option<JobStatus>,
}

/// Create or reset the job and rendition for a pair to pending.
pub fn register_pending(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
    source_path: &str,
    output_path: &str,
    spec: RenditionSpec,
) -> Result<Registration> {
    let tx = immediate(conn)?;

    let previous = jobs::get_job_for_pair(&tx, video_id, quality)?.map(|j| j.status);
    let job = jobs::upsert_pending_job(&tx, video_id, quality, source_path, output_path)?;
    let rendition =
        renditions::upsert_pending_rendition(&tx, video_id, quality, output_path, spec)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(Registration {
        job,
        rendition,
        previous,
    })
}

/// Record a pair that can never be encoded: both records are created (or
/// reset) and immediately marked failed with `reason`.
pub fn register_rejected(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
    source_path: &str,
    output_path: &str,
    reason: &str,
) -> Result<TranscodeJob> {
    let tx = immediate(conn)?;

    let job = jobs::upsert_pending_job(&tx, video_id, quality, source_path, output_path)?;
    renditions::upsert_pending_rendition(
        &tx,
        video_id,
        quality,
        output_path,
        RenditionSpec::default(),
    )?;
    jobs::mark_failed(&tx, job.id, job.attempts, reason)?;
    renditions::mark_failed(&tx, video_id, quality)?;

    let failed = jobs::get_job(&tx, job.id)?.ok_or_else(|| Error::not_found("job", job.id))?;
    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(failed)
}

/// Mark the job completed and the rendition ready with `file_size_bytes`.
///
/// Returns false, writing nothing, when the job is no longer on `attempt`
/// or no longer processing.
pub fn record_success(
    conn: &Connection,
    job_id: TranscodeJobId,
    attempt: u32,
    key: &RenditionKey,
    file_size_bytes: u64,
) -> Result<bool> {
    let tx = immediate(conn)?;

    if !jobs::mark_completed(&tx, job_id, attempt)? {
        return Ok(false);
    }
    renditions::mark_ready(&tx, key.video_id, &key.quality, file_size_bytes)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}

/// Mark the job failed with `reason` and the rendition failed.
///
/// Returns false, writing nothing, when the job is no longer on `attempt`
/// or already terminal.
pub fn record_failure(
    conn: &Connection,
    job_id: TranscodeJobId,
    attempt: u32,
    key: &RenditionKey,
    reason: &str,
) -> Result<bool> {
    let tx = immediate(conn)?;

    if !jobs::mark_failed(&tx, job_id, attempt, reason)? {
        return Ok(false);
    }
    renditions::mark_failed(&tx, key.video_id, &key.quality)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}
