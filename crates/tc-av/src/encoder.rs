//! The encoder seam and its ffmpeg implementation.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tc_core::config::{ToolsConfig, TranscodeConfig};
use tc_core::QualityPreset;
use tokio_util::sync::CancellationToken;

use crate::command::{tool_name, ToolCommand};
use crate::tools::resolve_ffmpeg;

/// One encode: a source file, a destination file and the preset to apply.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub preset: &'static QualityPreset,
}

/// Result of a successful encode.
#[derive(Debug, Clone, Default)]
pub struct EncodeOutput {
    /// Combined stdout+stderr of the encoder.
    pub log: String,
}

impl EncodeOutput {
    /// Last non-blank line of the log; ffmpeg ends a run with its size and
    /// speed summary there.
    pub fn summary(&self) -> Option<&str> {
        self.log
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
    }
}

/// Runs a single encode to completion.
///
/// Implementations must stop promptly once `cancel` fires, returning
/// [`tc_core::Error::Cancelled`], and report an unsuccessful run as
/// [`tc_core::Error::Encode`] carrying the encoder's output verbatim.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> tc_core::Result<EncodeOutput>;
}

/// Build the ffmpeg argument list for a request.
///
/// H.264 video scaled to the preset's dimensions, AAC audio, MP4 with the
/// index moved to the front for progressive playback, and the destination
/// always overwritten.
pub fn build_args(req: &EncodeRequest) -> Vec<String> {
    let p = req.preset;
    vec![
        "-i".into(),
        req.source.to_string_lossy().to_string(),
        "-vf".into(),
        format!("scale={}:{}", p.width, p.height),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        p.speed.as_str().into(),
        "-crf".into(),
        p.crf.to_string(),
        "-b:v".into(),
        format!("{}k", p.video_bitrate_kbps),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", p.audio_bitrate_kbps),
        "-movflags".into(),
        "+faststart".into(),
        "-y".into(),
        req.dest.to_string_lossy().to_string(),
    ]
}

/// [`Encoder`] backed by an ffmpeg subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            timeout: None,
        }
    }

    /// Kill encodes that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve ffmpeg from the tools config and apply the per-job timeout.
    pub fn from_config(tools: &ToolsConfig, transcode: &TranscodeConfig) -> tc_core::Result<Self> {
        let program = resolve_ffmpeg(tools)?;
        tracing::debug!(path = %program.display(), "using ffmpeg");
        Ok(Self::new(program).with_timeout(transcode.job_timeout_secs.map(Duration::from_secs)))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> tc_core::Result<EncodeOutput> {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(build_args(req)).cancel_on(cancel.clone());
        if let Some(t) = self.timeout {
            cmd.timeout(t);
        }

        tracing::debug!(
            tool = %tool_name(&self.program),
            source = %req.source.display(),
            dest = %req.dest.display(),
            quality = req.preset.label,
            "starting encode"
        );

        let output = cmd.run().await?;
        if !output.status.success() {
            return Err(tc_core::Error::Encode {
                status: output.status.to_string(),
                output: output.combined(),
            });
        }

        Ok(EncodeOutput {
            log: output.combined(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tc_core::presets;

    fn request(quality: &str) -> EncodeRequest {
        EncodeRequest {
            source: PathBuf::from("/uploads/42.mp4"),
            dest: PathBuf::from("/out/video_42_720p.mp4"),
            preset: presets::resolve(quality).unwrap(),
        }
    }

    /// Write an executable shell script standing in for ffmpeg.
    fn fake_ffmpeg(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn args_follow_preset() {
        let args = build_args(&request("720p"));
        let joined = args.join(" ");
        assert_eq!(
            joined,
            "-i /uploads/42.mp4 -vf scale=1280:720 -c:v libx264 -preset medium -crf 24 \
             -b:v 3000k -c:a aac -b:a 128k -movflags +faststart -y /out/video_42_720p.mp4"
        );
    }

    #[test]
    fn destination_is_last_and_overwritten() {
        let args = build_args(&request("4K"));
        assert_eq!(args.last().map(String::as_str), Some("/out/video_42_720p.mp4"));
        assert_eq!(args[args.len() - 2], "-y");
        assert!(args.contains(&"scale=3840:2160".to_string()));
    }

    #[tokio::test]
    async fn successful_encode_writes_destination() {
        let dir = tempfile::tempdir().unwrap();
        // The last argument is the destination.
        let program = fake_ffmpeg(dir.path(), r#"for last; do :; done; echo encoded > "$last""#);
        let dest = dir.path().join("video_1_240p.mp4");

        let req = EncodeRequest {
            source: dir.path().join("in.mp4"),
            dest: dest.clone(),
            preset: presets::resolve("240p").unwrap(),
        };
        let out = FfmpegEncoder::new(program)
            .encode(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "encoded\n");
        assert_eq!(out.summary(), None);
    }

    #[tokio::test]
    async fn summary_is_last_line_of_encoder_log() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(
            dir.path(),
            r#"echo 'frame=  100 fps=50' >&2; echo 'video:812kB audio:64kB muxing overhead: 0.4%' >&2; echo >&2"#,
        );

        let out = FfmpegEncoder::new(program)
            .encode(&request("240p"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.log.contains("frame=  100"));
        assert_eq!(
            out.summary(),
            Some("video:812kB audio:64kB muxing overhead: 0.4%")
        );
    }

    #[tokio::test]
    async fn nonzero_exit_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(
            dir.path(),
            "echo 'in.mp4: Invalid data found when processing input' >&2; exit 1",
        );

        let err = FfmpegEncoder::new(program)
            .encode(&request("720p"), &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            tc_core::Error::Encode { output, .. } => {
                assert!(output.contains("Invalid data found"), "output: {output}");
            }
            other => panic!("expected Encode error, got {other:?}"),
        }
        assert!(err.diagnostic().contains("Invalid data found"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "exec sleep 10");

        let err = FfmpegEncoder::new(program)
            .with_timeout(Some(Duration::from_millis(100)))
            .encode(&request("720p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, tc_core::Error::TimedOut { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "exec sleep 10");
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = FfmpegEncoder::new(program)
            .encode(&request("720p"), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled(), "got {err:?}");
    }
}
