//! Bucket key layout.
//!
//! ```text
//! {camera}/Images/{YYYY-MM-DD}/...                      source stills
//! {camera}/Footage/{YYYY-MM-DD}/                        folder marker
//! {camera}/Footage/{YYYY-MM-DD}/{camera}-{YYYY-MM-DD-HH}-24hrs.mp4
//! ```
//!
//! Dates and hour stamps are rendered in a fixed UTC offset (UTC+8 by
//! default), never in the host's local zone. Downstream tooling parses these
//! keys and the tag string, so both are stable.

use chrono::{DateTime, FixedOffset, Utc};

/// Content type of published videos and their folder markers
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Fixed file name suffix of published videos
pub const VIDEO_SUFFIX: &str = "-24hrs.mp4";

const IMAGES_FOLDER: &str = "Images";
const FOOTAGE_FOLDER: &str = "Footage";

/// Key naming for one bucket
#[derive(Debug, Clone)]
pub struct KeyLayout {
    offset: FixedOffset,
    image_extension: String,
    interval_hours: u32,
}

impl KeyLayout {
    pub fn new(offset: FixedOffset, image_extension: impl Into<String>, interval_hours: u32) -> Self {
        Self {
            offset,
            image_extension: image_extension.into(),
            interval_hours,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn image_extension(&self) -> &str {
        &self.image_extension
    }

    /// Date folder name (`YYYY-MM-DD`) for a reference time
    pub fn date_folder(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%Y-%m-%d").to_string()
    }

    /// Hour stamp (`YYYY-MM-DD-HH`) used in video file names
    pub fn hour_stamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%Y-%m-%d-%H").to_string()
    }

    /// `{camera}/Images/`
    pub fn images_root(&self, camera: &str) -> String {
        format!("{}/{}/", camera, IMAGES_FOLDER)
    }

    /// `{camera}/Images/{date}/`
    pub fn images_folder(&self, camera: &str, at: DateTime<Utc>) -> String {
        format!("{}{}/", self.images_root(camera), self.date_folder(at))
    }

    /// `{camera}/Footage/{date}/`
    pub fn footage_folder(&self, camera: &str, at: DateTime<Utc>) -> String {
        format!("{}/{}/{}/", camera, FOOTAGE_FOLDER, self.date_folder(at))
    }

    /// Destination key of the video published for `camera` at `at`
    pub fn video_key(&self, camera: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}-{}{}",
            self.footage_folder(camera, at),
            camera,
            self.hour_stamp(at),
            VIDEO_SUFFIX
        )
    }

    /// Object tagging attached to videos and folder markers.
    ///
    /// Written verbatim, without URL encoding.
    pub fn tagging(&self, camera: &str) -> String {
        format!("camera={}&interval_hours={}", camera, self.interval_hours)
    }

    /// Whether a key carries the canonical image extension
    pub fn is_image_key(&self, key: &str) -> bool {
        key.strip_suffix(self.image_extension.as_str())
            .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
    }
}

/// Camera name from a top-level common prefix (`front-door/` -> `front-door`)
pub fn camera_from_prefix(prefix: &str) -> Option<&str> {
    prefix.split('/').find(|part| !part.is_empty())
}
