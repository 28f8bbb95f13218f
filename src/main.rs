mod cli;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tc_av::FfmpegEncoder;
use tc_core::config::Config;
use tc_core::{presets, TranscodeJobId, VideoId};
use tc_db::pool::{init_pool, DbPool};
use tc_transcode::{Recovery, TranscodingService};
use tokio::sync::broadcast::error::RecvError;

/// Searched in order when no `--config` is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./tubecode.toml",
    "~/.config/tubecode/config.toml",
    "/etc/tubecode/config.toml",
];

/// How often `transcode` re-reads job state while waiting on events.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tubecode=debug,tc_transcode=debug,tc_av=debug,tc_db=debug,tc_core=debug".to_string()
        } else {
            "tubecode=info,tc_transcode=info,tc_av=warn,tc_db=warn,tc_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_workers(config))
        }
        Commands::Transcode {
            video_id,
            source,
            qualities,
            no_wait,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(transcode(
                config,
                VideoId::new(video_id),
                &source,
                qualities,
                !no_wait,
                json,
            ))
        }
        Commands::Status { video_id, json } => {
            let config = load_config(cli.config.as_deref())?;
            show_status(&config, VideoId::new(video_id), json)
        }
        Commands::Qualities { video_id, json } => {
            let config = load_config(cli.config.as_deref())?;
            show_qualities(&config, VideoId::new(video_id), json)
        }
        Commands::Presets { json } => list_presets(json),
        Commands::CheckTools => {
            let config = load_config(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(&config))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tubecode {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load the config file and apply environment overrides.
///
/// An explicit `--config` must load cleanly. Otherwise the first default
/// location that exists is used, falling back to built-in defaults (with a
/// warning) when it cannot be parsed.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => Config::load(&expand(p))
            .with_context(|| format!("Failed to load config {}", p.display()))?,
        None => {
            let found = DEFAULT_CONFIG_PATHS
                .iter()
                .map(|p| expand(Path::new(p)))
                .find(|p| p.exists());
            Config::load_or_default(found.as_deref())
        }
    };

    config.apply_env_overrides();
    config.database.path = expand(&config.database.path);
    config.transcode.output_dir = expand(&config.transcode.output_dir);
    config.tools.ffmpeg_path = config.tools.ffmpeg_path.as_deref().map(expand);

    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn open_db(config: &Config) -> Result<DbPool> {
    let db_path = &config.database.path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tracing::debug!("Opening database at {}", db_path.display());
    Ok(init_pool(&db_path.to_string_lossy())?)
}

async fn start_service(config: &Config, recovery: Recovery) -> Result<TranscodingService> {
    let db = open_db(config)?;
    let encoder = FfmpegEncoder::from_config(&config.tools, &config.transcode)?;
    let service =
        TranscodingService::start_with(&config.transcode, db, Arc::new(encoder), recovery).await?;
    Ok(service)
}

async fn run_workers(config: Config) -> Result<()> {
    let service = start_service(&config, Recovery::Resume).await?;
    tracing::info!(
        workers = service.pool().workers(),
        output_dir = %config.transcode.output_dir.display(),
        "Processing pending transcodes; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    service.shutdown().await;
    Ok(())
}

async fn transcode(
    config: Config,
    video_id: VideoId,
    source: &Path,
    qualities: Vec<String>,
    wait: bool,
    json: bool,
) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("Source file does not exist: {:?}", source);
    }
    let source = source
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", source.display()))?;
    let qualities = if qualities.is_empty() {
        config.transcode.default_qualities.clone()
    } else {
        qualities
    };

    if !wait {
        // No workers: the rows stay pending until `tubecode run` picks them up.
        let db = open_db(&config)?;
        let jobs = tc_transcode::record_pending(
            &db,
            &config.transcode.output_dir,
            video_id,
            &source,
            &qualities,
        )?;
        tracing::info!(count = jobs.len(), "Recorded jobs for the next `run`");
        return show_jobs(&jobs, json);
    }

    // Pending work of other videos belongs to `run`; leave it alone.
    let service = start_service(&config, Recovery::Skip).await?;
    let events = service.subscribe();

    let result = match service.queue_transcoding(video_id, &source, &qualities) {
        Ok(jobs) => {
            let ids = jobs
                .iter()
                .filter(|j| !j.status.is_terminal())
                .map(|j| j.id)
                .collect();
            wait_for_jobs(&service, events, ids).await;
            Ok(())
        }
        Err(e) => Err(e),
    };

    service.shutdown().await;
    result?;

    show_jobs(&service.get_transcoding_status(video_id)?, json)
}

/// Block until every job in `pending` is terminal, or Ctrl-C.
async fn wait_for_jobs(
    service: &TranscodingService,
    mut events: tokio::sync::broadcast::Receiver<tc_core::events::Event>,
    mut pending: HashSet<TranscodeJobId>,
) {
    let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);

    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.payload.is_terminal() => {
                    pending.remove(&event.payload.job_id());
                }
                Ok(_) => {}
                // Missed events are caught by the next poll.
                Err(RecvError::Lagged(n)) => tracing::debug!("Missed {n} events"),
                Err(RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                pending.retain(|id| match service.get_job(*id) {
                    Ok(job) => !job.status.is_terminal(),
                    Err(e) => {
                        tracing::warn!(job_id = %id, "Failed to read job: {e}");
                        false
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; cancelling running encodes");
                break;
            }
        }
    }
}

fn show_status(config: &Config, video_id: VideoId, json: bool) -> Result<()> {
    let conn = tc_db::pool::get_conn(&open_db(config)?)?;
    let jobs = tc_db::queries::jobs::list_by_video(&conn, video_id)?;
    show_jobs(&jobs, json)
}

fn show_jobs(jobs: &[tc_db::models::TranscodeJob], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No transcoding jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{:<6} {:<10} {:>3}%  attempt {}",
            job.target_quality,
            job.status.as_str(),
            job.progress,
            job.attempts
        );
        if let Some(ref err) = job.error_message {
            for line in err.lines().filter(|l| !l.trim().is_empty()).take(5) {
                println!("       {line}");
            }
        }
    }
    Ok(())
}

fn show_qualities(config: &Config, video_id: VideoId, json: bool) -> Result<()> {
    let conn = tc_db::pool::get_conn(&open_db(config)?)?;
    let ready = tc_db::queries::renditions::list_ready_by_video(&conn, video_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ready)?);
        return Ok(());
    }

    if ready.is_empty() {
        println!("No ready renditions");
        return Ok(());
    }
    for r in &ready {
        println!(
            "{:<6} {}x{} {:>6} kbps {:>12} bytes  {}",
            r.quality,
            r.width,
            r.height,
            r.bitrate_kbps,
            r.file_size_bytes.unwrap_or(0),
            r.output_location
        );
    }
    Ok(())
}

fn list_presets(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(presets::all())?);
        return Ok(());
    }

    for p in presets::all() {
        println!(
            "{:<6} {:>4}x{:<4} video {:>5} kbps  audio {:>3} kbps  crf {:>2}  {}",
            p.label, p.width, p.height, p.video_bitrate_kbps, p.audio_bitrate_kbps, p.crf, p.speed
        );
    }
    Ok(())
}

async fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tool = tc_av::check_ffmpeg(&config.tools).await;
    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);
    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }
    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }
    println!();

    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or set FFMPEG_PATH.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(&expand(p))?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Database: {}", config.database.path.display());
    println!("  Output dir: {}", config.transcode.output_dir.display());
    println!("  Workers: {}", config.transcode.workers);
    println!("  Queue capacity: {}", config.transcode.queue_capacity);
    println!(
        "  Default qualities: {}",
        config.transcode.default_qualities.join(", ")
    );

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  - {w}");
        }
    }

    Ok(())
}
