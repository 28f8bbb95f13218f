//! # tc-av
//!
//! External encoder handling for the tubecode pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`tools`]) -- locate ffmpeg from config, the
//!   `FFMPEG_PATH` override or `PATH`, and report its version.
//! - **Command execution** ([`ToolCommand`]) -- async builder that runs an
//!   external process with captured output, an optional deadline and a
//!   cancellation token that kills the child.
//! - **Encoding** ([`Encoder`], [`FfmpegEncoder`]) -- the seam the worker
//!   pool drives; tests substitute a scripted implementation.

pub mod command;
pub mod encoder;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use encoder::{build_args, EncodeOutput, EncodeRequest, Encoder, FfmpegEncoder};
pub use tools::{check_ffmpeg, resolve_ffmpeg, ToolInfo};
