//! tc-db: durable store for the transcoding pipeline.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, typed models, and query modules for transcoding
//! jobs and renditions. Writes that touch both records go through
//! [`queries::outcomes`] so the two never disagree.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
