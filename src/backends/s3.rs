use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use chrono::DateTime;
use tracing::{instrument, warn};

use crate::backends::common::{Backend, BodyStream, ListPage, collect_body};
use crate::error::{ErrorKind, Operation, Result, StorageError};
use crate::{Config, DEFAULT_REGION, ObjectInfo};

/// Gateway to AWS S3 or an S3-compatible service.
#[derive(Clone)]
pub struct S3Backend {
    client: Arc<S3Client>,
    region: String,
}

impl S3Backend {
    /// Builds a client from `config`, falling back to the environment's
    /// region and credential chain for anything left unset.
    #[instrument(skip(config), fields(region = ?config.region, endpoint = ?config.endpoint_url))]
    pub async fn connect(config: &Config) -> Self {
        let region_provider = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "bucket-browser",
            ));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let region = shared
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        Self::from_client(Arc::new(S3Client::from_conf(s3_config)), region)
    }

    /// Wraps an existing client; `region` is where new buckets are created.
    pub fn from_client(client: Arc<S3Client>, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// Region new buckets are created in.
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Classifies an SDK error and logs it with the S3 error code.
fn provider_error<E, R>(
    err: SdkError<E, R>,
    operation: Operation,
    bucket: &str,
    key: Option<&str>,
) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let kind = classify(&err);
    warn!(
        %operation,
        bucket,
        key,
        s3_error_code = code.as_deref().unwrap_or("N/A"),
        s3_error_message = err.message().unwrap_or("no message"),
        %kind,
        "S3 call failed"
    );
    StorageError::new(kind, operation, bucket, key)
        .with_source(anyhow::Error::new(err).context(format!("aws_sdk_s3 {operation} failed")))
}

/// Only timeouts and dispatch failures are worth retrying as-is. Service
/// errors go by their S3 code; an unparseable response is `Other`.
fn classify<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> ErrorKind {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorKind::Transient,
        SdkError::ServiceError(_) => err.code().map_or(ErrorKind::Other, ErrorKind::from_code),
        _ => ErrorKind::Other,
    }
}

fn object_info(obj: &aws_sdk_s3::types::Object) -> Option<ObjectInfo> {
    let key = obj.key()?;
    Some(ObjectInfo {
        key: key.to_string(),
        size: obj.size().map(|s| s as u64),
        last_modified: obj
            .last_modified()
            .and_then(|lm| DateTime::from_timestamp(lm.secs(), lm.subsec_nanos())),
        etag: obj.e_tag().map(str::to_string),
    })
}

#[async_trait]
impl Backend for S3Backend {
    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::ListBuckets, "", None))?;
        Ok(resp
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::ListObjects, bucket, None))?;

        Ok(ListPage {
            common_prefixes: resp
                .common_prefixes()
                .iter()
                .filter_map(|cp| cp.prefix().map(str::to_string))
                .collect(),
            objects: resp.contents().iter().filter_map(object_info).collect(),
            next_continuation_token: resp.next_continuation_token().map(str::to_string),
        })
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut req = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        req.send()
            .await
            .map_err(|e| provider_error(e, Operation::CreateBucket, bucket, None))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::DeleteBucket, bucket, None))?;
        Ok(())
    }

    #[instrument(skip(self, stream))]
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        stream: BodyStream,
        content_length: Option<u64>,
    ) -> Result<()> {
        // Single PutObject: the body is buffered so its length is known up front.
        let data = collect_body(stream, content_length, bucket, key).await?;
        let len = data.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(len)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::PutObject, bucket, Some(key)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_stream(&self, bucket: &str, key: &str) -> Result<BodyStream> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::GetObject, bucket, Some(key)))?;
        let stream = futures::stream::unfold(resp.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(anyhow::Error::from), body))
        });
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::DeleteObject, bucket, Some(key)))?;
        Ok(())
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let build_error = |e: aws_sdk_s3::error::BuildError| {
            StorageError::new(ErrorKind::Other, Operation::DeleteObjects, bucket, None)
                .with_source(anyhow::Error::new(e).context("failed to build DeleteObjects request"))
        };
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(build_error)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(build_error)?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::DeleteObjects, bucket, None))?;

        // Quiet mode only reports the keys that failed.
        if let Some(first) = resp.errors().first() {
            let failed = resp.errors().len();
            warn!(
                bucket,
                failed,
                s3_error_code = first.code().unwrap_or("N/A"),
                "bulk delete partially failed"
            );
            return Err(StorageError::new(
                first.code().map_or(ErrorKind::Other, ErrorKind::from_code),
                Operation::DeleteObjects,
                bucket,
                first.key(),
            )
            .with_source(anyhow::anyhow!(
                "{failed} of {} keys not deleted: {}",
                keys.len(),
                first.message().unwrap_or("no message")
            )));
        }
        Ok(keys.len())
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, urlencoding::encode(src_key)))
            .bucket(dest_bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| provider_error(e, Operation::CopyObject, src_bucket, Some(src_key)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::get_object::GetObjectError;

    use super::*;

    type GetError = SdkError<GetObjectError, ()>;

    #[test]
    fn test_timeouts_are_transient() {
        let err = GetError::timeout_error("read timed out");
        assert_eq!(classify(&err), ErrorKind::Transient);
    }

    #[test]
    fn test_unparseable_response_is_not_retryable() {
        let err = GetError::response_error("truncated XML body", ());
        assert_eq!(classify(&err), ErrorKind::Other);
        assert!(!classify(&err).is_retryable());
    }

    #[test]
    fn test_service_error_uses_code() {
        let missing = GetObjectError::generic(ErrorMetadata::builder().code("NoSuchKey").build());
        assert_eq!(classify(&GetError::service_error(missing, ())), ErrorKind::NotFound);

        let slow_down = GetObjectError::generic(ErrorMetadata::builder().code("SlowDown").build());
        assert_eq!(classify(&GetError::service_error(slow_down, ())), ErrorKind::Transient);
    }
}
