use crate::config::S3Config;
use crate::error::{StoreError, StoreResult};
use anyhow::Result;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Delimiter that turns key prefixes into browsable folders
pub const FOLDER_DELIMITER: &str = "/";

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key
    pub key: String,
    /// Last-modified time, when the store reported one
    pub last_modified: Option<DateTime<Utc>>,
}

/// Parameters of a single ListObjectsV2 call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    /// Groups keys below the next delimiter into common prefixes
    pub delimiter: Option<String>,
    /// Cursor returned by the previous page
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Present while more pages remain
    pub next_continuation_token: Option<String>,
}

/// Payload of an object write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectBody {
    Bytes(Bytes),
    /// Streamed from a local file when the request is sent
    File(PathBuf),
}

impl ObjectBody {
    pub fn empty() -> Self {
        ObjectBody::Bytes(Bytes::new())
    }
}

/// Object written by the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub key: String,
    pub body: ObjectBody,
    pub content_type: String,
    /// URL-query style tag set (`k1=v1&k2=v2`)
    pub tagging: String,
}

/// Bucket operations the job depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of keys under a prefix
    async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage>;

    /// Fetch an object body
    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    /// Create or replace an object
    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<()>;
}

/// Collect every object under `prefix`, following continuation cursors to the end
#[instrument(skip(store))]
pub async fn list_all_objects(
    store: &dyn ObjectStore,
    prefix: &str,
    page_size: Option<i32>,
) -> StoreResult<Vec<ObjectSummary>> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_objects(ListRequest {
                prefix: prefix.to_string(),
                delimiter: None,
                continuation_token: continuation_token.clone(),
                max_keys: page_size,
            })
            .await?;

        pages += 1;
        objects.extend(page.objects);

        match next_cursor(continuation_token.as_deref(), page.next_continuation_token)? {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    debug!(prefix = %prefix, pages, objects = objects.len(), "Listed objects");
    Ok(objects)
}

/// Collect the immediate sub-folders of `prefix` across all pages
#[instrument(skip(store))]
pub async fn list_common_prefixes(
    store: &dyn ObjectStore,
    prefix: &str,
    page_size: Option<i32>,
) -> StoreResult<Vec<String>> {
    let mut prefixes = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let page = store
            .list_objects(ListRequest {
                prefix: prefix.to_string(),
                delimiter: Some(FOLDER_DELIMITER.to_string()),
                continuation_token: continuation_token.clone(),
                max_keys: page_size,
            })
            .await?;

        prefixes.extend(page.common_prefixes);

        match next_cursor(continuation_token.as_deref(), page.next_continuation_token)? {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    Ok(prefixes)
}

/// Whether anything (an object or a sub-folder) exists under `prefix`
pub async fn prefix_exists(store: &dyn ObjectStore, prefix: &str) -> StoreResult<bool> {
    let page = store
        .list_objects(ListRequest {
            prefix: prefix.to_string(),
            delimiter: Some(FOLDER_DELIMITER.to_string()),
            continuation_token: None,
            max_keys: Some(1),
        })
        .await?;

    Ok(!page.objects.is_empty() || !page.common_prefixes.is_empty())
}

/// Whether `prefix` has at least one sub-folder.
///
/// Objects sitting directly under `prefix`, such as a folder marker, do not
/// count.
pub async fn has_subfolders(
    store: &dyn ObjectStore,
    prefix: &str,
    page_size: Option<i32>,
) -> StoreResult<bool> {
    let mut continuation_token: Option<String> = None;

    loop {
        let page = store
            .list_objects(ListRequest {
                prefix: prefix.to_string(),
                delimiter: Some(FOLDER_DELIMITER.to_string()),
                continuation_token: continuation_token.clone(),
                max_keys: page_size,
            })
            .await?;

        if !page.common_prefixes.is_empty() {
            return Ok(true);
        }

        match next_cursor(continuation_token.as_deref(), page.next_continuation_token)? {
            Some(token) => continuation_token = Some(token),
            None => return Ok(false),
        }
    }
}

/// Next cursor to request, rejecting a store that hands back the cursor it was given
fn next_cursor(sent: Option<&str>, received: Option<String>) -> StoreResult<Option<String>> {
    match received {
        Some(token) if token.is_empty() => Ok(None),
        Some(token) if sent == Some(token.as_str()) => Err(StoreError::invalid_response(
            "list_objects",
            format!("continuation token {:?} repeated", token),
        )),
        other => Ok(other),
    }
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 store with bounded timeouts and retries
    pub async fn new(config: &S3Config) -> Result<Self> {
        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .operation_timeout(config.operation_timeout())
            .build();

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
            .timeout_config(timeout_config)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            max_attempts = config.max_attempts,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, request), fields(prefix = %request.prefix))]
    async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter)
            .set_continuation_token(request.continuation_token)
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| classify_sdk_error("list_objects", e))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                let last_modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                Some(ObjectSummary { key, last_modified })
            })
            .collect();

        let common_prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(String::from))
            .collect();

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token: response.next_continuation_token().map(String::from),
        })
    }

    #[instrument(skip(self))]
    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("get_object", e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::transient("get_object", e.to_string()))?;

        Ok(body.into_bytes())
    }

    #[instrument(skip(self, request), fields(key = %request.key))]
    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<()> {
        let body = match &request.body {
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes.clone()),
            ObjectBody::File(path) => ByteStream::from_path(path).await.map_err(|e| {
                StoreError::permanent("put_object", format!("{}: {}", path.display(), e))
            })?,
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(body)
            .content_type(request.content_type)
            .tagging(request.tagging)
            .send()
            .await
            .map_err(|e| classify_sdk_error("put_object", e))?;

        debug!(key = %request.key, "Object stored");
        Ok(())
    }
}

/// Service error codes worth another attempt on a later run
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
    "InternalError",
    "ServiceUnavailable",
];

/// Map an SDK error, already retried by the SDK, onto the store taxonomy
fn classify_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();

    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => err
            .as_service_error()
            .and_then(|e| e.code())
            .is_some_and(is_transient_code),
        _ => false,
    };

    if transient {
        StoreError::transient(operation, message)
    } else {
        StoreError::permanent(operation, message)
    }
}

fn is_transient_code(code: &str) -> bool {
    TRANSIENT_CODES.contains(&code)
}
