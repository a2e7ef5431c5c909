//! S3-compatible store (AWS S3, Cloudflare R2, MinIO).

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region, StalledStreamProtectionConfig};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::debug;

use super::{AssetSink, AssetSource, ErrorKind, ListPage, StoreError, StoreOutcome};
use crate::asset::AssetRecord;
use crate::config::{S3Credentials, S3StoreConfig};

/// Status returned when `If-None-Match: *` finds an existing object.
const PRECONDITION_FAILED: u16 = 412;

/// Bucket-backed asset store.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Build a client for the configured bucket.
    pub fn new(config: &S3StoreConfig, credentials: &S3Credentials) -> Self {
        let creds = Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "asset-migrate-env",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region.clone()))
            .credentials_provider(creds)
            .force_path_style(config.force_path_style)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    pub fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Map an SDK error to a classified store error.
fn sdk_error<E>(context: String, err: &SdkError<E, HttpResponse>) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError {
        kind: classify(err),
        message: format!("{}: {}", context, DisplayErrorContext(err)),
    }
}

fn classify<E>(err: &SdkError<E, HttpResponse>) -> ErrorKind {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorKind::Transient
        }
        SdkError::ServiceError(ctx) => ErrorKind::from_status(ctx.raw().status().as_u16()),
        _ => ErrorKind::Permanent,
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

#[async_trait]
impl AssetSource for S3Store {
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let max_keys = i32::try_from(limit.clamp(1, 1000)).unwrap_or(1000);
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_continuation_token(cursor)
            .send()
            .await
            .map_err(|e| sdk_error(format!("list s3://{}/{}", self.bucket, prefix), &e))?;

        let assets = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                // Folder placeholder objects
                if key.ends_with('/') {
                    return None;
                }
                Some(AssetRecord {
                    path: key.to_string(),
                    size_bytes: obj.size().and_then(|s| u64::try_from(s).ok()),
                })
            })
            .collect::<Vec<_>>();

        let next_cursor = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        debug!(
            "Listed {} objects under s3://{}/{}",
            assets.len(),
            self.bucket,
            prefix
        );
        Ok(ListPage {
            assets,
            next_cursor,
        })
    }

    async fn fetch(&self, path: &str) -> Result<Bytes, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| sdk_error(format!("get s3://{}/{}", self.bucket, path), &e))?;

        // A body cut off mid-stream is worth another try
        let body = output.body.collect().await.map_err(|e| {
            StoreError::transient(format!("read body s3://{}/{}: {}", self.bucket, path, e))
        })?;
        Ok(body.into_bytes())
    }
}

#[async_trait]
impl AssetSink for S3Store {
    /// `HeadObject`; `Ok(false)` when the object does not exist.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(false);
                }
                Err(sdk_error(format!("head s3://{}/{}", self.bucket, key), &err))
            }
        }
    }

    async fn store(&self, path: &str, body: Bytes) -> Result<StoreOutcome, StoreError> {
        if self.exists(path).await? {
            return Ok(StoreOutcome::AlreadyExists);
        }

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await;

        match result {
            Ok(_) => Ok(StoreOutcome::Stored),
            // Someone wrote the object between the head and the put
            Err(e) if status_of(&e) == Some(PRECONDITION_FAILED) => Ok(StoreOutcome::AlreadyExists),
            Err(e) => Err(sdk_error(format!("put s3://{}/{}", self.bucket, path), &e)),
        }
    }
}
