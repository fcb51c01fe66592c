//! Timelapse Service
//!
//! Batch job that turns the still images cameras upload to S3 into one daily
//! timelapse video per camera. Each invocation discovers the cameras from the
//! bucket's top-level folders, selects the images that fall inside the
//! aggregation window, encodes them with ffmpeg, and publishes the video next
//! to the images under the camera's `Footage/` folder.
//!
//! ## Features
//!
//! - **Camera Discovery**: every top-level folder of the bucket is a camera
//! - **Windowed Selection**: images of the local date folder whose last-modified
//!   time falls in the trailing window, oldest first
//! - **Single Staging Area**: frames are staged locally under numbered names
//!   and cleared before the next camera starts
//! - **Failure Isolation**: one camera failing is reported and the run moves on
//!
//! ## Architecture
//!
//! ```text
//! S3 Bucket                                                   S3 Bucket
//! ┌──────────────────┐                                        ┌──────────────────┐
//! │ {cam}/Images/    │                                        │ {cam}/Footage/   │
//! │   {date}/*.jpg   │                                        │   {date}/        │
//! └──────────────────┘                                        │   {cam}-...mp4   │
//!        │                                                    └──────────────────┘
//!        ▼                                                           ▲
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐        │
//! │ Selection    │────▶│ Staging      │────▶│ FFmpeg       │────────┘
//! │ Engine       │     │ Area         │     │ Encoder      │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!        ▲
//!        │
//! ┌──────────────┐
//! │ Timelapse    │──────▶ RunSummary (stdout)
//! │ Job          │
//! └──────────────┘
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod object_store;
pub mod orchestrator;
pub mod selection;
pub mod staging;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use encoder::{EncodeJob, Encoder, FfmpegEncoder};
pub use error::{CameraError, EncodeError, StagingError, Stage, StoreError};
pub use layout::KeyLayout;
pub use object_store::{ObjectBody, ObjectStore, S3ObjectStore};
pub use orchestrator::{CameraOutcome, CameraReport, RunStatus, RunSummary, SkipReason, TimelapseJob};
pub use selection::{Selection, SelectionEngine};
pub use staging::{StagingArea, StagingSession};
pub use window::AggregationWindow;
