//! FFmpeg wrapper turning staged frames into one MP4.

use crate::config::EncoderConfig;
use crate::error::EncodeError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Longest stderr excerpt kept in an error
const STDERR_TAIL_BYTES: usize = 2048;

/// One encode: numbered frames in, one video out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    /// printf-style pattern of the numbered frames, starting at index 0
    pub input_pattern: PathBuf,
    pub frame_count: usize,
    pub output: PathBuf,
}

/// Video encoder
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode `job.frame_count` frames, in index order, into `job.output`
    async fn encode(&self, job: &EncodeJob) -> Result<(), EncodeError>;
}

/// Encoder shelling out to the ffmpeg CLI
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Full ffmpeg argument list for a job
    pub fn build_args(&self, job: &EncodeJob) -> Vec<String> {
        let c = &self.config;
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            // Input: numbered stills at a fixed rate
            "-framerate".to_string(),
            c.framerate.to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            "-i".to_string(),
            job.input_pattern.to_string_lossy().into_owned(),
            "-frames:v".to_string(),
            job.frame_count.to_string(),
            // Output
            "-c:v".to_string(),
            c.video_codec.clone(),
            "-pix_fmt".to_string(),
            c.pixel_format.clone(),
            "-b:v".to_string(),
            c.bitrate.clone(),
            "-movflags".to_string(),
            c.movflags.clone(),
            "-f".to_string(),
            c.format.clone(),
            job.output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    #[instrument(skip(self, job), fields(frames = job.frame_count, output = %job.output.display()))]
    async fn encode(&self, job: &EncodeJob) -> Result<(), EncodeError> {
        if job.frame_count == 0 {
            return Err(EncodeError::NoFrames);
        }

        let args = self.build_args(job);
        debug!(program = %self.config.ffmpeg_path, ?args, "Running encoder");

        let output = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EncodeError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncodeError::Failed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        if tokio::fs::metadata(&job.output).await.is_err() {
            return Err(EncodeError::MissingOutput(job.output.clone()));
        }

        info!(frames = job.frame_count, "Video encoded");
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }

    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
