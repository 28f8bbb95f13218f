use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tubecode")]
#[command(author, version, about = "Transcode uploaded videos into streaming renditions")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool, resuming pending jobs, until interrupted
    Run,

    /// Queue a source video for transcoding and wait for the renditions
    Transcode {
        /// Video identifier
        video_id: i64,

        /// Source video file
        source: PathBuf,

        /// Target quality (repeatable); defaults to transcode.default_qualities
        #[arg(short, long = "quality")]
        qualities: Vec<String>,

        /// Only record the jobs as pending; `tubecode run` encodes them
        #[arg(long)]
        no_wait: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every transcoding job of a video, most recent first
    Status {
        /// Video identifier
        video_id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the ready renditions of a video, best quality first
    Qualities {
        /// Video identifier
        video_id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the quality presets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the encoder is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
