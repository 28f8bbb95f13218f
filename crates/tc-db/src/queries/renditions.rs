//! Rendition record operations, keyed by (video, quality).

use rusqlite::Connection;
use tc_core::{Error, QualityPreset, RenditionId, Result, VideoId};

use super::now;
use crate::models::Rendition;

const COLS: &str = "id, video_id, quality, output_location, bitrate_kbps, width, height,
    file_size_bytes, status, created_at";

/// Encoding dimensions recorded on a rendition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenditionSpec {
    pub bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
}

impl From<&QualityPreset> for RenditionSpec {
    fn from(p: &QualityPreset) -> Self {
        Self {
            bitrate_kbps: p.video_bitrate_kbps,
            width: p.width,
            height: p.height,
        }
    }
}

/// Create a pending rendition for the pair, or reset the existing one.
///
/// A reset clears `file_size_bytes` and refreshes the output location and
/// configured dimensions.
pub fn upsert_pending_rendition(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
    output_location: &str,
    spec: RenditionSpec,
) -> Result<Rendition> {
    let id = RenditionId::new();

    let q = format!(
        "INSERT INTO video_renditions
            (id, video_id, quality, output_location, bitrate_kbps, width, height,
             status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
         ON CONFLICT (video_id, quality) DO UPDATE SET
            status = 'pending',
            file_size_bytes = NULL,
            output_location = excluded.output_location,
            bitrate_kbps = excluded.bitrate_kbps,
            width = excluded.width,
            height = excluded.height
         RETURNING {COLS}"
    );

    conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            video_id.get(),
            quality,
            output_location,
            spec.bitrate_kbps,
            spec.width,
            spec.height,
            now()
        ],
        Rendition::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Get the rendition for a (video, quality) pair.
pub fn get_rendition(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
) -> Result<Option<Rendition>> {
    let q = format!("SELECT {COLS} FROM video_renditions WHERE video_id = ?1 AND quality = ?2");
    let result = conn.query_row(
        &q,
        rusqlite::params![video_id.get(), quality],
        Rendition::from_row,
    );
    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Mark a rendition ready with the size of the encoded artifact.
///
/// Refuses a zero size: a ready rendition always has bytes on disk.
pub fn mark_ready(
    conn: &Connection,
    video_id: VideoId,
    quality: &str,
    file_size_bytes: u64,
) -> Result<bool> {
    if file_size_bytes == 0 {
        return Err(Error::Validation(format!(
            "rendition {video_id}/{quality} cannot be ready with zero bytes"
        )));
    }
    let size = i64::try_from(file_size_bytes)
        .map_err(|_| Error::Validation(format!("file size {file_size_bytes} out of range")))?;
    let n = conn
        .execute(
            "UPDATE video_renditions SET status = 'ready', file_size_bytes = ?1
             WHERE video_id = ?2 AND quality = ?3",
            rusqlite::params![size, video_id.get(), quality],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a rendition failed. Returns true if a row was updated.
pub fn mark_failed(conn: &Connection, video_id: VideoId, quality: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE video_renditions SET status = 'failed', file_size_bytes = NULL
             WHERE video_id = ?1 AND quality = ?2",
            rusqlite::params![video_id.get(), quality],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// All renditions for a video in any status, highest resolution first.
pub fn list_by_video(conn: &Connection, video_id: VideoId) -> Result<Vec<Rendition>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLS} FROM video_renditions WHERE video_id = ?1
             ORDER BY height DESC, bitrate_kbps DESC"
        ),
        video_id,
    )
}

/// Ready renditions for a video, highest resolution first.
pub fn list_ready_by_video(conn: &Connection, video_id: VideoId) -> Result<Vec<Rendition>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLS} FROM video_renditions WHERE video_id = ?1 AND status = 'ready'
             ORDER BY height DESC, bitrate_kbps DESC"
        ),
        video_id,
    )
}

fn query_list(conn: &Connection, q: &str, video_id: VideoId) -> Result<Vec<Rendition>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([video_id.get()], Rendition::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
