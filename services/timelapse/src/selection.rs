use crate::error::StoreResult;
use crate::layout::KeyLayout;
use crate::object_store::{list_all_objects, ObjectStore, ObjectSummary};
use crate::window::AggregationWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, trace};

/// An image eligible for the current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Result of selecting one camera's images
#[derive(Debug, Clone)]
pub struct Selection {
    /// Window the images were filtered against
    pub window: AggregationWindow,
    /// Date folder that was listed
    pub folder: String,
    /// Images ordered by last-modified time, then key
    pub images: Vec<ImageObject>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.key.as_str())
    }
}

/// Chooses which stored images belong to a camera's aggregation window
///
/// Lists the camera's `Images/{date}/` folder for the reference date, keeps
/// objects whose last-modified time falls in the window and whose key has the
/// canonical image extension, and orders them oldest first. Equal timestamps
/// are ordered by key so repeated runs feed the encoder identical sequences.
#[derive(Debug, Clone)]
pub struct SelectionEngine {
    layout: KeyLayout,
    window_hours: u32,
    page_size: Option<i32>,
}

impl SelectionEngine {
    pub fn new(layout: KeyLayout, window_hours: u32) -> Self {
        Self {
            layout,
            window_hours,
            page_size: None,
        }
    }

    /// Keys requested per listing page
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Window for a run at `reference`
    pub fn window(&self, reference: DateTime<Utc>) -> AggregationWindow {
        AggregationWindow::ending_after(reference, self.window_hours, self.layout.offset())
    }

    /// Select `camera`'s images for a run at `reference`.
    ///
    /// A missing date folder lists as empty and yields an empty selection.
    #[instrument(skip(self, store), fields(camera = %camera))]
    pub async fn select_window_images(
        &self,
        store: &dyn ObjectStore,
        camera: &str,
        reference: DateTime<Utc>,
    ) -> StoreResult<Selection> {
        let window = self.window(reference);
        let folder = self.layout.images_folder(camera, reference);

        let objects = list_all_objects(store, &folder, self.page_size).await?;
        let listed = objects.len();
        let images = self.filter_and_order(objects, &window);

        debug!(
            folder = %folder,
            listed,
            selected = images.len(),
            window_start = %window.start,
            window_end = %window.end,
            "Selected window images"
        );

        Ok(Selection {
            window,
            folder,
            images,
        })
    }

    /// Window and extension filtering followed by the stable ordering
    pub fn filter_and_order(
        &self,
        objects: Vec<ObjectSummary>,
        window: &AggregationWindow,
    ) -> Vec<ImageObject> {
        let mut images: Vec<ImageObject> = objects
            .into_iter()
            .filter_map(|obj| {
                let Some(last_modified) = obj.last_modified else {
                    debug!(key = %obj.key, "Skipping object without last-modified time");
                    return None;
                };
                if !window.contains(last_modified) {
                    trace!(key = %obj.key, %last_modified, "Outside window");
                    return None;
                }
                if !self.layout.is_image_key(&obj.key) {
                    trace!(key = %obj.key, "Not an image key");
                    return None;
                }
                Some(ImageObject {
                    key: obj.key,
                    last_modified,
                })
            })
            .collect();

        images.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });

        images
    }
}
