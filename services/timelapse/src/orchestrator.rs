use crate::config::{Config, ConfigError};
use crate::encoder::{EncodeJob, Encoder};
use crate::error::{CameraError, Stage, StoreResult};
use crate::layout::{camera_from_prefix, KeyLayout, VIDEO_CONTENT_TYPE};
use crate::object_store::{
    has_subfolders, list_common_prefixes, prefix_exists, ObjectBody, ObjectStore, PutObjectRequest,
};
use crate::selection::SelectionEngine;
use crate::staging::{CleanupReport, StagingArea};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Why a camera produced no video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No `Images/` folder under the camera prefix
    NoImagesFolder,
    /// The folder exists but nothing falls in the window
    NoImages,
}

/// Result of one camera's pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CameraOutcome {
    Published {
        video_key: String,
        frames: usize,
        /// Whether this run created the footage date-folder marker
        folder_created: bool,
        cleanup: CleanupReport,
    },
    Skipped {
        reason: SkipReason,
    },
    DryRun {
        frames: usize,
        video_key: String,
    },
    Failed {
        stage: Stage,
        error: String,
        transient: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraReport {
    pub camera: String,
    pub outcome: CameraOutcome,
}

/// Overall status reported to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => f.write_str("Success"),
            RunStatus::Error => f.write_str("Error"),
        }
    }
}

/// Everything one invocation did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reference_time: DateTime<Utc>,
    pub status: RunStatus,
    /// Set when the camera list itself could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    pub cameras: Vec<CameraReport>,
}

impl RunSummary {
    pub fn outcome(&self, camera: &str) -> Option<&CameraOutcome> {
        self.cameras
            .iter()
            .find(|report| report.camera == camera)
            .map(|report| &report.outcome)
    }

    pub fn failed(&self) -> usize {
        self.cameras
            .iter()
            .filter(|r| matches!(r.outcome, CameraOutcome::Failed { .. }))
            .count()
    }
}

/// Create the empty marker object that makes `folder` browsable.
///
/// Returns whether a marker was written; nothing is written when the folder
/// already holds anything.
pub async fn ensure_folder_marker(
    store: &dyn ObjectStore,
    folder: &str,
    tagging: &str,
) -> StoreResult<bool> {
    if prefix_exists(store, folder).await? {
        return Ok(false);
    }

    store
        .put_object(PutObjectRequest {
            key: folder.to_string(),
            body: ObjectBody::empty(),
            content_type: VIDEO_CONTENT_TYPE.to_string(),
            tagging: tagging.to_string(),
        })
        .await?;

    info!(folder = %folder, "Created footage folder marker");
    Ok(true)
}

/// One batch pass over every camera in the bucket.
///
/// Cameras run strictly one after another: they share a single staging area.
/// A camera's failure is recorded in the summary and the run moves on.
pub struct TimelapseJob {
    store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn Encoder>,
    layout: KeyLayout,
    selector: SelectionEngine,
    staging: StagingArea,
    page_size: Option<i32>,
    dry_run: bool,
}

impl TimelapseJob {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn Encoder>,
        layout: KeyLayout,
        staging: StagingArea,
        window_hours: u32,
    ) -> Self {
        let selector = SelectionEngine::new(layout.clone(), window_hours);
        Self {
            store,
            encoder,
            layout,
            selector,
            staging,
            page_size: None,
            dry_run: false,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self, ConfigError> {
        let layout = KeyLayout::new(
            config.utc_offset()?,
            config.job.image_extension.clone(),
            config.job.interval_hours,
        );
        let staging = StagingArea::new(config.staging.dir.clone(), config.job.image_extension.clone());

        Ok(Self::new(store, encoder, layout, staging, config.job.window_hours)
            .with_page_size(config.s3.list_page_size)
            .with_dry_run(config.job.dry_run))
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self.selector = self.selector.with_page_size(page_size);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run every discovered camera against `reference`
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run(&mut self, reference: DateTime<Utc>) -> RunSummary {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        info!(
            reference_time = %reference,
            date = %self.layout.date_folder(reference),
            dry_run = self.dry_run,
            "Starting timelapse run"
        );

        let cameras = match self.discover_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                error!(error = %e, "Camera discovery failed");
                return RunSummary {
                    run_id,
                    reference_time: reference,
                    status: RunStatus::Error,
                    discovery_error: Some(e.to_string()),
                    cameras: Vec::new(),
                };
            }
        };

        info!(cameras = cameras.len(), "Discovered cameras");

        let mut reports = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let outcome = match self.process_camera(&camera, reference).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        camera = %camera,
                        stage = %e.stage(),
                        transient = e.is_transient(),
                        error = %e,
                        "Camera pipeline failed"
                    );
                    CameraOutcome::Failed {
                        stage: e.stage(),
                        error: e.to_string(),
                        transient: e.is_transient(),
                    }
                }
            };

            record_outcome_metrics(&outcome);
            reports.push(CameraReport { camera, outcome });
        }

        let status = if reports
            .iter()
            .any(|r| matches!(r.outcome, CameraOutcome::Failed { .. }))
        {
            RunStatus::Error
        } else {
            RunStatus::Success
        };

        info!(status = %status, cameras = reports.len(), "Timelapse run finished");

        RunSummary {
            run_id,
            reference_time: reference,
            status,
            discovery_error: None,
            cameras: reports,
        }
    }

    /// Camera names from the bucket's top-level folders
    pub async fn discover_cameras(&self) -> StoreResult<Vec<String>> {
        let prefixes = list_common_prefixes(self.store.as_ref(), "", self.page_size).await?;
        Ok(prefixes
            .iter()
            .filter_map(|prefix| camera_from_prefix(prefix))
            .map(String::from)
            .collect())
    }

    #[instrument(skip(self, reference), fields(camera = %camera))]
    async fn process_camera(
        &mut self,
        camera: &str,
        reference: DateTime<Utc>,
    ) -> Result<CameraOutcome, CameraError> {
        let images_root = self.layout.images_root(camera);
        // A folder counts once it holds a date sub-folder; a bare marker does not
        let has_images_folder = has_subfolders(self.store.as_ref(), &images_root, self.page_size)
            .await
            .map_err(|e| CameraError::store(Stage::FolderCheck, e))?;

        if !has_images_folder {
            info!(camera = %camera, "Images/ folder not found, skipping");
            return Ok(CameraOutcome::Skipped {
                reason: SkipReason::NoImagesFolder,
            });
        }

        let selection = self
            .selector
            .select_window_images(self.store.as_ref(), camera, reference)
            .await
            .map_err(|e| CameraError::store(Stage::Selection, e))?;

        if selection.is_empty() {
            info!(camera = %camera, folder = %selection.folder, "No images in window, skipping");
            return Ok(CameraOutcome::Skipped {
                reason: SkipReason::NoImages,
            });
        }

        let video_key = self.layout.video_key(camera, reference);

        if self.dry_run {
            info!(
                camera = %camera,
                frames = selection.images.len(),
                first = selection.keys().next().unwrap_or_default(),
                last = selection.keys().last().unwrap_or_default(),
                video_key = %video_key,
                "Dry run, not staging"
            );
            return Ok(CameraOutcome::DryRun {
                frames: selection.images.len(),
                video_key,
            });
        }

        let store = Arc::clone(&self.store);
        let encoder = Arc::clone(&self.encoder);
        let footage_folder = self.layout.footage_folder(camera, reference);
        let tagging = self.layout.tagging(camera);

        // Frames are cleared when the session is released or dropped
        let mut session = self.staging.acquire(camera).await?;

        for image in &selection.images {
            let data = store
                .get_object(&image.key)
                .await
                .map_err(|e| CameraError::store(Stage::Staging, e))?;
            session.stage_frame(&data).await?;
        }
        metrics::counter!("timelapse.frames.staged").increment(session.frame_count() as u64);

        let job = EncodeJob {
            input_pattern: session.input_pattern(),
            frame_count: session.frame_count(),
            output: session.video_path(),
        };
        let started = Instant::now();
        encoder.encode(&job).await?;
        metrics::histogram!("timelapse.encode.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let folder_created = ensure_folder_marker(store.as_ref(), &footage_folder, &tagging)
            .await
            .map_err(|e| CameraError::store(Stage::Publishing, e))?;

        store
            .put_object(PutObjectRequest {
                key: video_key.clone(),
                body: ObjectBody::File(job.output.clone()),
                content_type: VIDEO_CONTENT_TYPE.to_string(),
                tagging,
            })
            .await
            .map_err(|e| CameraError::store(Stage::Publishing, e))?;

        info!(camera = %camera, video_key = %video_key, frames = job.frame_count, "Video published");

        // The video is published; clean-up problems are reported, not fatal
        let cleanup = session.release().await;
        if !cleanup.is_clean() {
            warn!(
                camera = %camera,
                failures = ?cleanup.failures,
                "Failed to delete some staged frames"
            );
            metrics::counter!("timelapse.staging.cleanup_failures")
                .increment(cleanup.failures.len() as u64);
        }

        Ok(CameraOutcome::Published {
            video_key,
            frames: job.frame_count,
            folder_created,
            cleanup,
        })
    }
}

fn record_outcome_metrics(outcome: &CameraOutcome) {
    match outcome {
        CameraOutcome::Published { .. } => {
            metrics::counter!("timelapse.cameras.published").increment(1)
        }
        CameraOutcome::Skipped { .. } | CameraOutcome::DryRun { .. } => {
            metrics::counter!("timelapse.cameras.skipped").increment(1)
        }
        CameraOutcome::Failed { .. } => metrics::counter!("timelapse.cameras.failed").increment(1),
    }
}
