//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row` selected with the column list of its query module.

use serde::Serialize;
use std::str::FromStr;
use tc_core::{JobStatus, RenditionId, RenditionKey, RenditionStatus, TranscodeJobId, VideoId};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_failure(idx, e))?;
    Ok(T::from(uuid))
}

/// Parse a status enum from a text column.
fn parse_status<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = tc_core::Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_failure(idx, e))
}

// ---------------------------------------------------------------------------
// TranscodeJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TranscodeJob {
    pub id: TranscodeJobId,
    pub video_id: VideoId,
    pub target_quality: String,
    pub status: JobStatus,
    /// 0 until processing finishes, 100 once completed.
    pub progress: u8,
    pub error_message: Option<String>,
    pub source_path: String,
    pub output_path: String,
    /// Incremented on every submission of this pair.
    pub attempts: u32,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub queued_at: String,
    pub created_at: String,
}

impl TranscodeJob {
    /// Build from a row selected as:
    /// id, video_id, target_quality, status, progress, error_message,
    /// source_path, output_path, attempts, started_at, completed_at,
    /// queued_at, created_at
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let progress: i64 = row.get(4)?;
        let attempts: i64 = row.get(8)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            video_id: VideoId::new(row.get(1)?),
            target_quality: row.get(2)?,
            status: parse_status(row, 3)?,
            progress: progress.clamp(0, 100) as u8,
            error_message: row.get(5)?,
            source_path: row.get(6)?,
            output_path: row.get(7)?,
            attempts: attempts.max(0) as u32,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
            queued_at: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    pub fn key(&self) -> RenditionKey {
        RenditionKey::new(self.video_id, self.target_quality.clone())
    }
}

// ---------------------------------------------------------------------------
// Rendition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Rendition {
    pub id: RenditionId,
    pub video_id: VideoId,
    pub quality: String,
    pub output_location: String,
    /// As configured by the preset, not measured from the output.
    pub bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
    /// Set only after a successful encode.
    pub file_size_bytes: Option<u64>,
    pub status: RenditionStatus,
    pub created_at: String,
}

impl Rendition {
    /// Build from a row selected as:
    /// id, video_id, quality, output_location, bitrate_kbps, width, height,
    /// file_size_bytes, status, created_at
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let bitrate: i64 = row.get(4)?;
        let width: i64 = row.get(5)?;
        let height: i64 = row.get(6)?;
        let size: Option<i64> = row.get(7)?;
        Ok(Self {
            id: parse_id(row, 0)?,
            video_id: VideoId::new(row.get(1)?),
            quality: row.get(2)?,
            output_location: row.get(3)?,
            bitrate_kbps: bitrate.max(0) as u32,
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            file_size_bytes: size.map(|s| s.max(0) as u64),
            status: parse_status(row, 8)?,
            created_at: row.get(9)?,
        })
    }
}
