//! FFmpeg-based media probing and audio extraction
//!
//! Uses ffprobe (command-line) to read media durations and stream layout,
//! and ffmpeg to pull mono MP3 segments out of video files for
//! transcription.
//!
//! This approach is more reliable than Rust FFmpeg bindings as the CLI
//! tools' JSON output and argument surface are stable and well-documented.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use super::audio_sampler::AudioExtractor;

/// Media file information from ffprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File path that was probed
    pub path: String,

    /// Container format (e.g., "matroska,webm", "mov,mp4,m4a,3gp,3g2,mj2")
    pub container_format: String,

    /// Total duration in seconds
    pub duration_secs: Option<f64>,

    /// File size in bytes
    pub size_bytes: Option<i64>,

    /// Overall bitrate in bits per second
    pub bitrate: Option<i64>,

    /// Whether the file has at least one video stream
    pub has_video: bool,

    /// Whether the file has at least one audio stream
    pub has_audio: bool,

    /// Codec of the first video stream
    pub video_codec: Option<String>,

    /// Codec of the first audio stream
    pub audio_codec: Option<String>,

    /// Width of the first video stream
    pub width: Option<u32>,

    /// Height of the first video stream
    pub height: Option<u32>,
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }
}

/// Service wrapping the ffmpeg and ffprobe executables
pub struct FfmpegService {
    /// Path to ffmpeg executable
    ffmpeg_path: String,
    /// Path to ffprobe executable
    ffprobe_path: String,
}

impl FfmpegService {
    /// Create a new service using executables on PATH
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    /// Create with custom executable paths
    pub fn with_paths(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Check if both ffmpeg and ffprobe are available
    pub async fn is_available(&self) -> bool {
        for program in [&self.ffmpeg_path, &self.ffprobe_path] {
            let ok = Command::new(program)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                return false;
            }
        }
        true
    }

    /// Probe a media file for duration, format, and stream layout
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        debug!(path = %path.display(), "Probing media file with ffprobe");

        if !path.exists() {
            anyhow::bail!(
                "ffprobe failed for '{}': file does not exist",
                path.display()
            );
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!(
                "ffprobe failed for '{}' (exit code {}): {}",
                path.display(),
                exit_code,
                if stderr.is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        let info = parse_probe_output(path, &output.stdout)?;

        debug!(
            path = %path.display(),
            duration_secs = ?info.duration_secs,
            has_video = info.has_video,
            has_audio = info.has_audio,
            "Media probe complete"
        );

        Ok(info)
    }

    /// Extract one audio segment to `output` as mono 128k MP3
    ///
    /// `-ss` is passed before the input for fast seeking; `-t` bounds the
    /// output duration.
    pub async fn extract_audio(
        &self,
        path: &Path,
        start_secs: f64,
        duration_secs: f64,
        output_path: &Path,
    ) -> Result<()> {
        debug!(
            path = %path.display(),
            start_secs,
            duration_secs,
            output = %output_path.display(),
            "Extracting audio segment with ffmpeg"
        );

        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-v", "error"])
            .args(["-ss", &start_secs.to_string()])
            .arg("-i")
            .arg(path)
            .args(["-t", &duration_secs.to_string()])
            .arg("-vn")
            .args(["-acodec", "libmp3lame"])
            .args(["-b:a", "128k"])
            .args(["-ac", "1"])
            .arg(output_path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffmpeg for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!(
                "ffmpeg failed for '{}' (exit code {}): {}",
                path.display(),
                exit_code,
                if stderr.is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        info!(
            path = %path.display(),
            start_secs,
            duration_secs,
            "Audio segment extracted"
        );

        Ok(())
    }
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioExtractor for FfmpegService {
    async fn media_duration(&self, path: &Path) -> Result<f64> {
        let info = self.probe(path).await?;
        info.duration_secs.ok_or_else(|| {
            anyhow::anyhow!("Media file '{}' reports no duration", path.display())
        })
    }

    async fn extract(
        &self,
        path: &Path,
        start_secs: f64,
        duration_secs: f64,
        output_path: &Path,
    ) -> Result<()> {
        self.extract_audio(path, start_secs, duration_secs, output_path)
            .await
    }
}

/// Convert ffprobe JSON output to our MediaInfo structure
fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<MediaInfo> {
    let probe: ffprobe::FfprobeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe JSON output")?;

    let format = probe.format.unwrap_or(ffprobe::Format {
        format_name: None,
        duration: None,
        size: None,
        bit_rate: None,
    });

    let streams = probe.streams.unwrap_or_default();
    let first_of = |kind: &str| {
        streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    };

    let video = first_of("video");
    let audio = first_of("audio");

    Ok(MediaInfo {
        path: path.to_string_lossy().to_string(),
        container_format: format.format_name.unwrap_or_default(),
        duration_secs: format.duration.as_ref().and_then(|d| d.parse::<f64>().ok()),
        size_bytes: format.size.as_ref().and_then(|s| s.parse::<i64>().ok()),
        bitrate: format.bit_rate.as_ref().and_then(|b| b.parse::<i64>().ok()),
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
    })
}
