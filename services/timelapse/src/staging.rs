//! Local staging area for frames awaiting encoding.
//!
//! Frames are written as `image-000000.<ext>`, `image-000001.<ext>`, ... in
//! selection order; the encoder reads them back through the matching
//! `image-%06d.<ext>` pattern, so the index is the only thing carrying frame
//! order. The directory is shared by every camera in a run, which is why it
//! is only reachable through a [`StagingSession`]: acquiring one clears any
//! leftover frames and the previous camera's video, and the session clears
//! its own frames when released or dropped on a failure path.

use crate::error::StagingError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Extensions removed when the staging area is cleared
pub const RECOGNIZED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Name of the encoded video inside the staging directory
pub const VIDEO_FILE_NAME: &str = "video.mp4";

const FRAME_PREFIX: &str = "image-";

/// File name of the frame at `index`
pub fn frame_file_name(index: usize, extension: &str) -> String {
    format!("{}{:06}.{}", FRAME_PREFIX, index, extension)
}

/// printf-style input pattern matching [`frame_file_name`]
pub fn frame_pattern(extension: &str) -> String {
    format!("{}%06d.{}", FRAME_PREFIX, extension)
}

/// Outcome of clearing staged frames
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Staging directory owned by the running job
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    extension: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Take the staging area for `camera`, clearing files left by anyone else.
    ///
    /// Fails if leftover frames or the previous video cannot be removed, since
    /// they would end up in this camera's video.
    pub async fn acquire(&mut self, camera: &str) -> Result<StagingSession<'_>, StagingError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::Prepare {
                path: self.dir.clone(),
                source,
            })?;

        let mut report = clear_images(&self.dir).await;

        let video = self.dir.join(VIDEO_FILE_NAME);
        match fs::remove_file(&video).await {
            Ok(()) => debug!(camera = %camera, "Removed previous video from staging area"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.failures.push(format!("{}: {}", video.display(), e)),
        }

        if report.removed > 0 {
            warn!(
                camera = %camera,
                removed = report.removed,
                "Removed leftover frames from staging area"
            );
        }
        if !report.is_clean() {
            return Err(StagingError::Dirty {
                path: self.dir.clone(),
                remaining: report.failures.len(),
            });
        }

        debug!(camera = %camera, dir = %self.dir.display(), "Staging area acquired");

        Ok(StagingSession {
            area: self,
            camera: camera.to_string(),
            frames: 0,
            released: false,
        })
    }
}

/// Exclusive, camera-scoped use of the staging area
#[derive(Debug)]
pub struct StagingSession<'a> {
    area: &'a mut StagingArea,
    camera: String,
    frames: usize,
    released: bool,
}

impl StagingSession<'_> {
    /// Write the next frame in sequence
    pub async fn stage_frame(&mut self, data: &[u8]) -> Result<PathBuf, StagingError> {
        let path = self
            .area
            .dir
            .join(frame_file_name(self.frames, &self.area.extension));

        fs::write(&path, data)
            .await
            .map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;

        self.frames += 1;
        Ok(path)
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Encoder input pattern for the staged frames
    pub fn input_pattern(&self) -> PathBuf {
        self.area.dir.join(frame_pattern(&self.area.extension))
    }

    pub fn video_path(&self) -> PathBuf {
        self.area.dir.join(VIDEO_FILE_NAME)
    }

    /// Clear this camera's frames and give the staging area back.
    ///
    /// The encoded video stays until the next [`StagingArea::acquire`].
    pub async fn release(mut self) -> CleanupReport {
        self.released = true;
        let report = clear_images(&self.area.dir).await;
        debug!(
            camera = %self.camera,
            removed = report.removed,
            failures = report.failures.len(),
            "Staging area released"
        );
        report
    }
}

impl Drop for StagingSession<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Failure path: clear synchronously so the next camera starts empty
        let report = clear_images_blocking(&self.area.dir);
        if !report.is_clean() {
            warn!(
                camera = %self.camera,
                failures = ?report.failures,
                "Failed to clear staging area after aborted pipeline"
            );
        }
    }
}

fn is_staged_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            RECOGNIZED_IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

async fn clear_images(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.failures.push(format!("{}: {}", dir.display(), e));
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                report.failures.push(format!("{}: {}", dir.display(), e));
                break;
            }
        };

        let path = entry.path();
        if !is_staged_image(&path) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.failures.push(format!("{}: {}", path.display(), e)),
        }
    }

    report
}

fn clear_images_blocking(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.failures.push(format!("{}: {}", dir.display(), e));
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !is_staged_image(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.failures.push(format!("{}: {}", path.display(), e)),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| is_staged_image(Path::new(name)))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_frame_naming_contract() {
        assert_eq!(frame_file_name(0, "jpg"), "image-000000.jpg");
        assert_eq!(frame_file_name(42, "jpg"), "image-000042.jpg");
        assert_eq!(frame_pattern("jpg"), "image-%06d.jpg");

        // Zero padding keeps lexical order equal to frame order
        let mut names: Vec<String> = [10, 2, 100, 1].iter().map(|i| frame_file_name(*i, "jpg")).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["image-000001.jpg", "image-000002.jpg", "image-000010.jpg", "image-000100.jpg"]
        );
    }

    #[test]
    fn test_recognized_extensions() {
        assert!(is_staged_image(Path::new("image-000001.jpg")));
        assert!(is_staged_image(Path::new("leftover.JPEG")));
        assert!(is_staged_image(Path::new("x.gif")));
        assert!(!is_staged_image(Path::new("video.mp4")));
        assert!(!is_staged_image(Path::new("notes")));
    }

    #[tokio::test]
    async fn test_stage_and_release() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path().join("staging"), "jpg");

        let mut session = area.acquire("front-door").await.unwrap();
        for frame in 0..3u8 {
            session.stage_frame(&[frame]).await.unwrap();
        }
        assert_eq!(session.frame_count(), 3);
        assert_eq!(
            session.input_pattern(),
            tmp.path().join("staging").join("image-%06d.jpg")
        );

        std::fs::write(session.video_path(), b"video").unwrap();
        assert_eq!(
            staged_files(&tmp.path().join("staging")),
            vec!["image-000000.jpg", "image-000001.jpg", "image-000002.jpg"]
        );

        let report = session.release().await;
        assert_eq!(report.removed, 3);
        assert!(report.is_clean());

        let staging = tmp.path().join("staging");
        assert!(staged_files(&staging).is_empty());
        assert!(staging.join(VIDEO_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_dropped_session_clears_frames() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");

        {
            let mut session = area.acquire("front-door").await.unwrap();
            session.stage_frame(b"a").await.unwrap();
            session.stage_frame(b"b").await.unwrap();
            // dropped without release, as on an encode failure
        }

        assert!(staged_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_second_camera_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");

        // Frames left behind by a crashed earlier process
        std::fs::write(tmp.path().join("image-000000.jpg"), b"stale").unwrap();
        std::fs::write(tmp.path().join("image-000007.png"), b"stale").unwrap();

        let mut first = area.acquire("front-door").await.unwrap();
        assert!(staged_files(tmp.path()).is_empty());
        for _ in 0..5 {
            first.stage_frame(b"front").await.unwrap();
        }
        first.release().await;

        let mut second = area.acquire("lobby").await.unwrap();
        second.stage_frame(b"lobby").await.unwrap();
        assert_eq!(second.frame_count(), 1);
        assert_eq!(staged_files(tmp.path()), vec!["image-000000.jpg"]);
        assert_eq!(
            std::fs::read(tmp.path().join("image-000000.jpg")).unwrap(),
            b"lobby"
        );
    }

    #[tokio::test]
    async fn test_acquire_removes_previous_video() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");
        std::fs::write(tmp.path().join(VIDEO_FILE_NAME), b"front-door video").unwrap();

        let session = area.acquire("lobby").await.unwrap();
        assert!(!session.video_path().exists());
    }

    #[tokio::test]
    async fn test_acquire_refuses_undeletable_leftovers() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");

        // remove_file cannot delete a directory
        std::fs::create_dir(tmp.path().join("image-000099.jpg")).unwrap();

        let err = area.acquire("front-door").await.unwrap_err();
        assert!(matches!(err, StagingError::Dirty { remaining: 1, .. }));
    }

    #[tokio::test]
    async fn test_acquire_refuses_undeletable_video() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");
        std::fs::create_dir(tmp.path().join(VIDEO_FILE_NAME)).unwrap();

        let err = area.acquire("front-door").await.unwrap_err();
        assert!(matches!(err, StagingError::Dirty { remaining: 1, .. }));
    }

    #[tokio::test]
    async fn test_release_reports_undeletable_frames() {
        let tmp = TempDir::new().unwrap();
        let mut area = StagingArea::new(tmp.path(), "jpg");

        let mut session = area.acquire("front-door").await.unwrap();
        session.stage_frame(b"a").await.unwrap();
        std::fs::create_dir(tmp.path().join("image-000099.jpg")).unwrap();

        let report = session.release().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_release_on_missing_dir_is_clean() {
        let tmp = TempDir::new().unwrap();
        let report = clear_images(&tmp.path().join("missing")).await;
        assert_eq!(report, CleanupReport::default());
    }
}
