use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::ObjectInfo;
use crate::error::{ErrorKind, Operation, Result, StorageError};

/// Most keys a provider accepts in one bulk delete (S3 `DeleteObjects`).
pub const DEFAULT_DELETE_BATCH_LIMIT: usize = 1000;

/// Largest buffer reserved up front from a caller's length hint.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// Object payload as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// One page of a listing as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Delimiter-grouped prefixes, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
    /// Objects directly matched by the listing.
    pub objects: Vec<ObjectInfo>,
    /// Set when more entries exist past this page.
    pub next_continuation_token: Option<String>,
}

impl ListPage {
    /// True when the provider handed back a continuation token.
    pub fn is_truncated(&self) -> bool {
        self.next_continuation_token.is_some()
    }
}

#[async_trait]
/// Bucket and object primitives of one object-storage provider.
///
/// Each method is a single provider call. Nothing is retried.
pub trait Backend: Send + Sync {
    /// Names of all buckets visible to the credentials.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Lists one page of `bucket` under `prefix`, grouping by `delimiter` when given.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    /// Creates a bucket in the backend's region.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Puts an object from a byte stream, overwriting any existing one.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        stream: BodyStream,
        content_length: Option<u64>,
    ) -> Result<()>;

    /// Gets a stream of object bytes.
    async fn get_stream(&self, bucket: &str, key: &str) -> Result<BodyStream>;

    /// Deletes an object. Missing keys are not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Deletes up to [`Backend::delete_batch_limit`] keys in one call and
    /// returns how many were removed.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<usize>;

    /// Server-side copy.
    async fn copy(&self, src_bucket: &str, src_key: &str, dest_bucket: &str, dest_key: &str)
    -> Result<()>;

    /// Most keys one [`Backend::delete_many`] call accepts.
    fn delete_batch_limit(&self) -> usize {
        DEFAULT_DELETE_BATCH_LIMIT
    }
}

/// Drains a body stream into one buffer.
pub(crate) async fn collect_body(
    mut stream: BodyStream,
    content_length: Option<u64>,
    bucket: &str,
    key: &str,
) -> Result<Bytes> {
    // The hint is advisory; the buffer grows past it if the body is larger.
    let capacity = content_length.map_or(0, |n| n.min(MAX_PREALLOCATION) as usize);
    let mut buffer = BytesMut::with_capacity(capacity);
    while let Some(item) = stream.next().await {
        let chunk = item.map_err(|e| {
            StorageError::new(ErrorKind::Other, Operation::PutObject, bucket, Some(key))
                .with_source(e.context("reading upload body failed"))
        })?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Wraps an in-memory payload as a single-chunk body.
pub fn body_from_bytes(data: Bytes) -> BodyStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
