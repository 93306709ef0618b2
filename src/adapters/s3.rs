use std::time::{Duration, SystemTime};

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{Client, primitives::ByteStream};
use bytes::Bytes;

use crate::endpoint::{Endpoint, NOT_FOUND_CODES, ObjectMeta, THROTTLE_CODES};
use crate::{Error, Result};

/// An S3-compatible [`Endpoint`]: one client bound to one bucket.
///
/// Error codes are mapped structurally: the 404 family becomes
/// [`Error::NotFound`], the throttling family becomes [`Error::Throttled`]
/// so the copy engine can back off, `AccessDenied` becomes
/// [`Error::PermissionDenied`], and everything else is surfaced as a
/// connection error with the SDK error as source.
#[derive(Clone, Debug)]
pub struct S3Endpoint {
    client: Client,
    bucket: String,
}

impl S3Endpoint {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Generic("s3 key cannot be empty".to_string()));
        }
        Ok(())
    }

    fn map_sdk_err<E>(key: &str, e: SdkError<E>) -> Error
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if let Some(code) = e.code() {
            if NOT_FOUND_CODES.contains(&code) {
                return Error::NotFound(key.to_string());
            }
            if THROTTLE_CODES.contains(&code) {
                return Error::Throttled(code.to_string());
            }
            if code == "AccessDenied" {
                return Error::PermissionDenied(key.to_string());
            }
        }
        Error::Connection(Box::new(e))
    }
}

fn to_system_time(dt: &aws_smithy_types::DateTime) -> SystemTime {
    if dt.secs() >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(dt.secs() as u64, dt.subsec_nanos())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(dt.secs().unsigned_abs())
    }
}

impl Endpoint for S3Endpoint {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Self::validate_key(key)?;

        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match resp {
            Ok(out) => Ok(Some(ObjectMeta {
                etag: out.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                size: out.content_length().unwrap_or_default().max(0) as u64,
                last_modified: out
                    .last_modified()
                    .map(to_system_time)
                    .unwrap_or(SystemTime::UNIX_EPOCH),
            })),
            // HEAD responses carry no error body, so a 404 surfaces as the
            // modeled NotFound variant rather than an error code.
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => match Self::map_sdk_err(key, e) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        Self::validate_key(key)?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let out = match resp {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(Error::NotFound(key.to_string()));
            }
            Err(e) => return Err(Self::map_sdk_err(key, e)),
        };

        let data = out
            .body
            .collect()
            .await
            .map_err(|e| Error::Connection(Box::new(e)))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        Self::validate_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Self::map_sdk_err(key, e))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_err(key, e))?;

        Ok(())
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {}
            Err(e) => match Self::map_sdk_err(&self.bucket, e) {
                Error::NotFound(_) => {}
                other => return Err(other),
            },
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, "created bucket");
                Ok(())
            }
            Err(e) => {
                let already_exists = e.code().is_some_and(|code| {
                    code == "BucketAlreadyOwnedByYou" || code == "BucketAlreadyExists"
                });
                if already_exists {
                    Ok(())
                } else {
                    Err(Self::map_sdk_err(&self.bucket, e))
                }
            }
        }
    }
}
