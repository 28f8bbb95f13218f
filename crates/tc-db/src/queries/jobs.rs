//! Transcoding job operations.
//!
//! One row per (video, target quality). Re-submitting a pair resets the
//! existing row to pending instead of inserting a duplicate; this is the
//! pipeline's retry mechanism.

use rusqlite::Connection;
use tc_core::{Error, Result, TranscodeJobId, VideoId};

use super::now;
use crate::models::TranscodeJob;

const COLS: &str = "id, video_id, target_quality, status, progress, error_message,
    source_path, output_path, attempts, started_at, completed_at,
    queued_at, created_at";

/// Create a pending job for the pair, or reset the existing one to pending.
///
/// A reset clears progress, error text and timestamps, points the job at the
/// new source/output paths and bumps `attempts`. The job id and `created_at`
/// of an existing row are kept.
pub fn upsert_pending_job(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
    source_path: &str,
    output_path: &str,
) -> Result<TranscodeJob> {
    let id = TranscodeJobId::new();
    let now = now();

    let q = format!(
        "INSERT INTO transcoding_jobs
            (id, video_id, target_quality, status, progress, source_path, output_path,
             attempts, queued_at, created_at)
         VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, 1, ?6, ?6)
         ON CONFLICT (video_id, target_quality) DO UPDATE SET
            status = 'pending',
            progress = 0,
            error_message = NULL,
            source_path = excluded.source_path,
            output_path = excluded.output_path,
            attempts = attempts + 1,
            started_at = NULL,
            completed_at = NULL,
            queued_at = excluded.queued_at
         RETURNING {COLS}"
    );

    conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            video_id.get(),
            quality,
            source_path,
            output_path,
            &now
        ],
        TranscodeJob::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: TranscodeJobId) -> Result<Option<TranscodeJob>> {
    let q = format!("SELECT {COLS} FROM transcoding_jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], TranscodeJob::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get the job for a (video, quality) pair.
pub fn get_job_for_pair(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
) -> Result<Option<TranscodeJob>> {
    let q = format!(
        "SELECT {COLS} FROM transcoding_jobs WHERE video_id = ?1 AND target_quality = ?2"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![video_id.get(), quality],
        TranscodeJob::from_row,
    );
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Claim a pending job for processing.
///
/// Sets `status='processing'` and `started_at`. Returns `None` when the job
/// is no longer pending (already claimed, or failed at submission).
pub fn mark_processing(conn: &Connection, id: TranscodeJobId) -> Result<Option<TranscodeJob>> {
    let q = format!(
        "UPDATE transcoding_jobs SET status = 'processing', progress = 0, started_at = ?1
         WHERE id = ?2 AND status = 'pending'
         RETURNING {COLS}"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![now(), id.to_string()],
        TranscodeJob::from_row,
    );
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Mark a processing job as completed with progress 100.
///
/// Only applies while the row is still on `attempt`; a re-submission in the
/// meantime makes this a no-op. Returns true if the row was updated.
pub fn mark_completed(conn: &Connection, id: TranscodeJobId, attempt: u32) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE transcoding_jobs SET status = 'completed', progress = 100,
                error_message = NULL, completed_at = ?1
             WHERE id = ?2 AND attempts = ?3 AND status = 'processing'",
            rusqlite::params![now(), id.to_string(), attempt],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a pending or processing job as failed with `reason`.
///
/// Guarded by `attempt` like [`mark_completed`]. Returns true if the row was
/// updated.
pub fn mark_failed(
    conn: &Connection,
    id: TranscodeJobId,
    attempt: u32,
    reason: &str,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE transcoding_jobs SET status = 'failed', progress = 0,
                error_message = ?1, completed_at = ?2
             WHERE id = ?3 AND attempts = ?4 AND status IN ('pending', 'processing')",
            rusqlite::params![reason, now(), id.to_string(), attempt],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// All jobs for a video, most recently submitted first.
pub fn list_by_video(conn: &Connection, video_id: VideoId) -> Result<Vec<TranscodeJob>> {
    let q = format!(
        "SELECT {COLS} FROM transcoding_jobs WHERE video_id = ?1
         ORDER BY queued_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([video_id.get()], TranscodeJob::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// All pending jobs, oldest submission first.
pub fn list_pending(conn: &Connection) -> Result<Vec<TranscodeJob>> {
    let q = format!(
        "SELECT {COLS} FROM transcoding_jobs WHERE status = 'pending'
         ORDER BY queued_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], TranscodeJob::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Reset jobs left in `processing` by a previous process back to pending.
///
/// Only safe to call before any worker of this process has started.
/// Returns the number of jobs reset.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE transcoding_jobs SET status = 'pending', progress = 0, started_at = NULL
         WHERE status = 'processing'",
        [],
    )
    .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use tc_core::JobStatus;

    fn setup() -> crate::pool::PooledConnection {
        init_memory_pool().unwrap().get().unwrap()
    }

    fn submit(conn: &Connection, video: i64, quality: &str) -> TranscodeJob {
        upsert_pending_job(
            conn,
            VideoId::new(video),
            quality,
            "/uploads/source.mp4",
            &format!("/renditions/video_{video}_{quality}.mp4"),
        )
        .unwrap()
    }

    #[test]
    fn create_and_get() {
        let conn = setup();
        let job = submit(&conn, 42, "720p");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 1);
        assert!(job.error_message.is_none());
        assert!(job.started_at.is_none());

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.video_id, VideoId::new(42));
        assert_eq!(found.target_quality, "720p");

        let by_pair = get_job_for_pair(&conn, VideoId::new(42), "720p")
            .unwrap()
            .unwrap();
        assert_eq!(by_pair.id, job.id);
        assert!(get_job_for_pair(&conn, VideoId::new(42), "1080p")
            .unwrap()
            .is_none());
    }

    #[test]
    fn resubmission_resets_instead_of_duplicating() {
        let conn = setup();
        let first = submit(&conn, 42, "720p");
        let claimed = mark_processing(&conn, first.id).unwrap().unwrap();
        assert!(mark_failed(&conn, claimed.id, claimed.attempts, "boom").unwrap());

        let second = submit(&conn, 42, "720p");
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, JobStatus::Pending);
        assert_eq!(second.attempts, 2);
        assert!(second.error_message.is_none());
        assert!(second.completed_at.is_none());
        assert_eq!(second.created_at, first.created_at);

        assert_eq!(list_by_video(&conn, VideoId::new(42)).unwrap().len(), 1);
    }

    #[test]
    fn claim_only_once() {
        let conn = setup();
        let job = submit(&conn, 1, "240p");

        let claimed = mark_processing(&conn, job.id).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started_at.is_some());

        assert!(mark_processing(&conn, job.id).unwrap().is_none());
    }

    #[test]
    fn complete_sets_progress() {
        let conn = setup();
        let job = submit(&conn, 1, "240p");
        let claimed = mark_processing(&conn, job.id).unwrap().unwrap();

        assert!(mark_completed(&conn, job.id, claimed.attempts).unwrap());
        let done = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn complete_requires_processing() {
        let conn = setup();
        let job = submit(&conn, 1, "240p");
        assert!(!mark_completed(&conn, job.id, job.attempts).unwrap());
    }

    #[test]
    fn stale_attempt_cannot_overwrite() {
        let conn = setup();
        let job = submit(&conn, 9, "720p");
        let claimed = mark_processing(&conn, job.id).unwrap().unwrap();

        // Re-submitted while the first attempt is still encoding.
        let again = submit(&conn, 9, "720p");
        assert_eq!(again.attempts, claimed.attempts + 1);

        assert!(!mark_completed(&conn, job.id, claimed.attempts).unwrap());
        assert!(!mark_failed(&conn, job.id, claimed.attempts, "cancelled").unwrap());
        let current = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Pending);
    }

    #[test]
    fn fail_pending_job() {
        let conn = setup();
        let job = submit(&conn, 7, "bogus");
        assert!(mark_failed(&conn, job.id, job.attempts, "quality preset not found: bogus").unwrap());

        let failed = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("quality preset not found: bogus")
        );

        // Terminal jobs are not failed twice.
        assert!(!mark_failed(&conn, job.id, job.attempts, "again").unwrap());
    }

    #[test]
    fn list_by_video_most_recent_first() {
        let conn = setup();
        submit(&conn, 42, "240p");
        submit(&conn, 42, "1080p");
        submit(&conn, 43, "240p");
        // Re-submitting moves 240p to the front.
        submit(&conn, 42, "240p");

        let jobs = list_by_video(&conn, VideoId::new(42)).unwrap();
        let qualities: Vec<_> = jobs.iter().map(|j| j.target_quality.as_str()).collect();
        assert_eq!(qualities, ["240p", "1080p"]);
    }

    #[test]
    fn pending_and_orphan_recovery() {
        let conn = setup();
        let a = submit(&conn, 1, "240p");
        let b = submit(&conn, 1, "360p");
        mark_processing(&conn, a.id).unwrap().unwrap();

        let pending = list_pending(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        assert_eq!(reset_orphaned_jobs(&conn).unwrap(), 1);
        let pending = list_pending(&conn).unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id).collect();
        assert_eq!(ids, [a.id, b.id]);
        assert!(get_job(&conn, a.id).unwrap().unwrap().started_at.is_none());
    }
}
