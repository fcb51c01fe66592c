//! In-memory collaborators for pipeline tests.

use crate::encoder::{EncodeJob, Encoder};
use crate::error::{EncodeError, StoreError, StoreResult};
use crate::object_store::{
    ListPage, ListRequest, ObjectBody, ObjectStore, ObjectSummary, PutObjectRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    last_modified: DateTime<Utc>,
}

/// Bucket held in memory, with S3 delimiter and pagination semantics
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    puts: Mutex<Vec<PutObjectRequest>>,
    failing_keys: Mutex<HashSet<String>>,
    page_size: usize,
    now: DateTime<Utc>,
}

impl InMemoryStore {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            page_size: 1000,
            now,
        }
    }

    /// Serve listings in pages of `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn insert(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: Bytes::copy_from_slice(body),
                last_modified,
            },
        );
    }

    /// Make `get_object(key)` fail
    pub fn fail_get(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn puts(&self) -> Vec<PutObjectRequest> {
        self.puts.lock().unwrap().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

enum Entry {
    Object(ObjectSummary),
    Prefix(String),
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage> {
        let objects = self.objects.lock().unwrap();

        let mut seen_prefixes = BTreeSet::new();
        let mut entries = Vec::new();
        for (key, object) in objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
                break;
            };

            let folder = request
                .delimiter
                .as_deref()
                .and_then(|d| rest.find(d).map(|i| &rest[..i + d.len()]));

            match folder {
                Some(folder) => {
                    let common = format!("{}{}", request.prefix, folder);
                    if seen_prefixes.insert(common.clone()) {
                        entries.push(Entry::Prefix(common));
                    }
                }
                None => entries.push(Entry::Object(ObjectSummary {
                    key: key.clone(),
                    last_modified: Some(object.last_modified),
                })),
            }
        }

        let page_size = request
            .max_keys
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);
        let offset = match request.continuation_token.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::permanent("list_objects", "bad continuation token"))?,
            None => 0,
        };

        let mut page = ListPage::default();
        for entry in entries.iter().skip(offset).take(page_size) {
            match entry {
                Entry::Object(summary) => page.objects.push(summary.clone()),
                Entry::Prefix(prefix) => page.common_prefixes.push(prefix.clone()),
            }
        }
        if offset + page_size < entries.len() {
            page.next_continuation_token = Some((offset + page_size).to_string());
        }

        Ok(page)
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(StoreError::transient("get_object", format!("{} timed out", key)));
        }

        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::permanent("get_object", format!("NoSuchKey: {}", key)))
    }

    async fn put_object(&self, mut request: PutObjectRequest) -> StoreResult<()> {
        // Files are read at send time, as the S3 adapter streams them
        let body = match &request.body {
            ObjectBody::Bytes(bytes) => bytes.clone(),
            ObjectBody::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| StoreError::permanent("put_object", e.to_string()))?,
        };

        self.insert(&request.key, &body, self.now);
        request.body = ObjectBody::Bytes(body);
        self.puts.lock().unwrap().push(request);
        Ok(())
    }
}

/// Encoder that records the frames it was given instead of running ffmpeg
#[derive(Default)]
pub struct RecordingEncoder {
    runs: Mutex<Vec<Vec<Vec<u8>>>>,
    fail: bool,
    leave_undeletable_frame: bool,
}

impl RecordingEncoder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Succeed, but leave a directory named like a frame in the staging area
    pub fn leaving_undeletable_frame() -> Self {
        Self {
            leave_undeletable_frame: true,
            ..Self::default()
        }
    }

    /// Frame contents of every encode, in frame order
    pub fn runs(&self) -> Vec<Vec<Vec<u8>>> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for RecordingEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<(), EncodeError> {
        let pattern = job.input_pattern.to_string_lossy().into_owned();
        let frames: Vec<Vec<u8>> = (0..job.frame_count)
            .map(|i| {
                let path = pattern.replace("%06d", &format!("{:06}", i));
                std::fs::read(path).unwrap()
            })
            .collect();

        // Nothing beyond the announced frame count may be staged
        let next = pattern.replace("%06d", &format!("{:06}", job.frame_count));
        assert!(!std::path::Path::new(&next).exists());

        self.runs.lock().unwrap().push(frames);

        if self.fail {
            return Err(EncodeError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }

        std::fs::write(&job.output, b"mp4").unwrap();
        if self.leave_undeletable_frame {
            let staging = job.output.parent().unwrap();
            std::fs::create_dir(staging.join("image-999999.jpg")).unwrap();
        }
        Ok(())
    }
}
