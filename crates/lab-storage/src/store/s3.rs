//! S3-compatible object store (AWS S3 or Cloudflare R2).

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::ObjectStore;
use crate::error::{ObjectStoreError, Result};

/// Per-request deadline for object-store calls.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Largest batch accepted by `DeleteObjects`.
const DELETE_BATCH_LIMIT: usize = 1000;

const ENV_BUCKET: &str = "AWS_S3_BUCKET_NAME";
const ENV_REGION: &str = "AWS_DEFAULT_REGION";
const ENV_ENDPOINT: &str = "S3_ENDPOINT_URL";
const ENV_R2_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_R2_ACCESS_KEY: &str = "R2_ACCESS_KEY";
const ENV_R2_SECRET_KEY: &str = "R2_SECRET_KEY";

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint; enables path-style addressing when set.
    pub endpoint_url: Option<String>,
    /// Static credentials. When absent the default AWS provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub operation_timeout: Option<Duration>,
}

impl S3Settings {
    /// Read settings, including the bucket, from the environment.
    pub fn from_env() -> Result<Self> {
        let bucket = non_empty_env(ENV_BUCKET)
            .ok_or_else(|| ObjectStoreError::Config(format!("{ENV_BUCKET} is not set")))?;
        Ok(Self::for_bucket(bucket))
    }

    /// Settings for `bucket`, with endpoint and credentials from the environment.
    ///
    /// `R2_ACCOUNT_ID` selects Cloudflare R2 with `R2_ACCESS_KEY`/`R2_SECRET_KEY`;
    /// otherwise `AWS_DEFAULT_REGION` and an optional `S3_ENDPOINT_URL` apply.
    #[must_use]
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        if let Some(account_id) = non_empty_env(ENV_R2_ACCOUNT_ID) {
            return Self {
                bucket,
                region: Some("auto".to_string()),
                endpoint_url: Some(format!("https://{account_id}.r2.cloudflarestorage.com")),
                access_key_id: non_empty_env(ENV_R2_ACCESS_KEY),
                secret_access_key: non_empty_env(ENV_R2_SECRET_KEY),
                operation_timeout: None,
            };
        }

        Self {
            bucket,
            region: non_empty_env(ENV_REGION),
            endpoint_url: non_empty_env(ENV_ENDPOINT),
            access_key_id: None,
            secret_access_key: None,
            operation_timeout: None,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// [`ObjectStore`] backed by the AWS SDK.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    timeout: Duration,
}

impl S3ObjectStore {
    /// Build a client from `settings`.
    pub async fn connect(settings: S3Settings) -> Result<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(ObjectStoreError::Config("bucket name is empty".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(key), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "lab-storage",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(bucket = %settings.bucket, endpoint = ?settings.endpoint_url, "Object store client initialized");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            timeout: settings.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT),
        })
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ObjectStoreError::Timeout {
                operation,
                key: key.to_string(),
            })?
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        debug!(bucket = %self.bucket, key = %key, bytes = body.len(), "PutObject");
        self.bounded("put", key, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| ObjectStoreError::request("put", key, DisplayErrorContext(e)))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!(bucket = %self.bucket, key = %key, "DeleteObject");
        self.bounded("delete", key, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| ObjectStoreError::request("delete", key, DisplayErrorContext(e)))
        })
        .await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(DELETE_BATCH_LIMIT) {
            let first = chunk.first().map_or("", String::as_str);
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ObjectStoreError::request("delete_many", first, e))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| ObjectStoreError::request("delete_many", first, e))?;

            debug!(bucket = %self.bucket, count = chunk.len(), "DeleteObjects");
            self.bounded("delete_many", first, async {
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| ObjectStoreError::request("delete_many", first, DisplayErrorContext(e)))
            })
            .await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .bounded("list", prefix, async {
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .set_continuation_token(continuation.clone())
                        .send()
                        .await
                        .map_err(|e| ObjectStoreError::request("list", prefix, DisplayErrorContext(e)))
                })
                .await?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        debug!(bucket = %self.bucket, from = %from, to = %to, "CopyObject");
        self.bounded("copy", to, async {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(copy_source(&self.bucket, from))
                .key(to)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| ObjectStoreError::request("copy", to, DisplayErrorContext(e)))
        })
        .await
    }
}

/// `x-amz-copy-source` value. Each key segment is percent-encoded, separators are kept.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}
