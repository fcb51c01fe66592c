use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the timelapse job
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Aggregation job configuration
    #[serde(default)]
    pub job: JobConfig,
    /// Local staging configuration
    #[serde(default)]
    pub staging: StagingConfig,
    /// Video encoder configuration
    #[serde(default)]
    pub encoder: EncoderConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the per-camera Images/ and Footage/ folders
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Total attempts per request, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Upper bound for a whole operation, retries included
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Keys requested per ListObjectsV2 page
    #[serde(default = "default_list_page_size")]
    pub list_page_size: i32,
}

/// Aggregation job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Offset from UTC used for date folders and hour stamps, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Extension (without dot) an image key must end with to be selected
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    /// Length of the aggregation window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// Value written to the `interval_hours` tag of published videos
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
    /// Fixed reference time replacing the wall clock (backfills, tests)
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,
    /// Select and log only; no staging, encoding or storage writes
    #[serde(default)]
    pub dry_run: bool,
}

/// Local staging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Directory holding staged frames and the encoded video
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

/// FFmpeg encoder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Input frame rate
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// Output video codec
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    /// Output video bitrate
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    /// MP4 muxer flags
    #[serde(default = "default_movflags")]
    pub movflags: String,
    /// Output container format
    #[serde(default = "default_format")]
    pub format: String,
}

// Default value functions
fn default_service_name() -> String {
    "timelapse-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_max_attempts() -> u32 {
    3 // first try + 2 retries
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_read_timeout_ms() -> u64 {
    3000
}

fn default_operation_timeout_secs() -> u64 {
    120
}

fn default_list_page_size() -> i32 {
    1000
}

fn default_utc_offset_minutes() -> i32 {
    480 // UTC+8
}

fn default_image_extension() -> String {
    "jpg".to_string()
}

fn default_window_hours() -> u32 {
    24
}

fn default_interval_hours() -> u32 {
    1
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("timelapse-staging")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_framerate() -> u32 {
    10
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_bitrate() -> String {
    "2M".to_string()
}

fn default_movflags() -> String {
    "frag_keyframe+empty_moov".to_string()
}

fn default_format() -> String {
    "mp4".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "timelapse-service")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(
                config::File::with_name("config/timelapse")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/timelapse/timelapse")
                    .required(false)
            )
            // Override with environment variables
            // TIMELAPSE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("TIMELAPSE")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the job cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.s3.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "s3.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.job.window_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "job.window_hours".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let extension = &self.job.image_extension;
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidValue {
                key: "job.image_extension".to_string(),
                message: format!("expected a bare extension like \"jpg\", got {:?}", extension),
            });
        }

        self.utc_offset()?;

        if self.encoder.framerate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "encoder.framerate".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        // VP8/VP9 belong in WebM, not in the MP4 container we publish
        if self.encoder.format == "mp4" && self.encoder.video_codec.starts_with("libvpx") {
            return Err(ConfigError::InvalidValue {
                key: "encoder.video_codec".to_string(),
                message: format!("{} cannot be muxed into mp4", self.encoder.video_codec),
            });
        }

        Ok(())
    }

    /// Get the fixed offset used for date folders and hour stamps
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.job.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "job.utc_offset_minutes".to_string(),
                message: format!("{} is outside +/-24h", self.job.utc_offset_minutes),
            }
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            image_extension: default_image_extension(),
            window_hours: default_window_hours(),
            interval_hours: default_interval_hours(),
            reference_time: None,
            dry_run: false,
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            framerate: default_framerate(),
            video_codec: default_video_codec(),
            pixel_format: default_pixel_format(),
            bitrate: default_bitrate(),
            movflags: default_movflags(),
            format: default_format(),
        }
    }
}

impl S3Config {
    /// Configuration for a bucket with every other value defaulted
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            operation_timeout_secs: default_operation_timeout_secs(),
            list_page_size: default_list_page_size(),
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get socket read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Get whole-operation timeout as Duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
