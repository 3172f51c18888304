use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::backends::common::{
    Backend, BodyStream, DEFAULT_DELETE_BATCH_LIMIT, ListPage, body_from_bytes, collect_body,
};
use crate::error::{ErrorKind, Operation, Result, StorageError};
use crate::{DEFAULT_REGION, ObjectInfo};

/// S3 returns at most this many entries per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

/// In-process object store with S3 listing semantics.
///
/// Keys are kept sorted so delimiter grouping and continuation tokens behave
/// like the real service. Page size and bulk-delete limit are configurable,
/// and failures can be injected per operation, which makes pagination and
/// partial-failure paths observable without a network.
pub struct MemoryBackend {
    region: String,
    page_size: usize,
    batch_limit: usize,
    buckets: RwLock<HashMap<String, Bucket>>,
    failures: Mutex<Vec<(Operation, ErrorKind)>>,
    delete_many_calls: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty store in `us-east-1` with S3's default page size and batch limit.
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_limit: DEFAULT_DELETE_BATCH_LIMIT,
            buckets: RwLock::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            delete_many_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the region reported by [`MemoryBackend::region`].
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Caps entries (objects plus common prefixes) per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Caps keys per `delete_many` call.
    pub fn with_delete_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Region this store pretends to live in.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Makes the next call of `operation` fail with `kind`.
    pub async fn fail_next(&self, operation: Operation, kind: ErrorKind) {
        self.failures.lock().await.push((operation, kind));
    }

    /// Number of `delete_many` calls served so far.
    pub fn delete_many_calls(&self) -> usize {
        self.delete_many_calls.load(Ordering::SeqCst)
    }

    /// Every key in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(Operation::ListObjects, bucket))?;
        Ok(objects.keys().cloned().collect())
    }

    async fn injected(&self, operation: Operation, bucket: &str, key: Option<&str>) -> Result<()> {
        let mut failures = self.failures.lock().await;
        if let Some(pos) = failures.iter().position(|(op, _)| *op == operation) {
            let (_, kind) = failures.remove(pos);
            return Err(StorageError::new(kind, operation, bucket, key)
                .with_source(anyhow::anyhow!("injected failure")));
        }
        Ok(())
    }
}

fn no_such_bucket(operation: Operation, bucket: &str) -> StorageError {
    StorageError::new(ErrorKind::NotFound, operation, bucket, None)
}

/// S3 naming rules: 3-63 chars of lowercase letters, digits, `.` and `-`,
/// starting and ending with a letter or digit.
fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    (3..=63).contains(&bytes.len())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && !name.contains("..")
}

/// Common prefix `key` rolls up into, if any.
fn common_prefix<'a>(key: &'a str, prefix: &str, delimiter: Option<&str>) -> Option<&'a str> {
    let delimiter = delimiter.filter(|d| !d.is_empty())?;
    let rest = &key[prefix.len()..];
    rest.find(delimiter)
        .map(|idx| &key[..prefix.len() + idx + delimiter.len()])
}

fn object_info(key: &str, object: &StoredObject) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: Some(object.data.len() as u64),
        last_modified: Some(object.last_modified),
        etag: Some(object.etag.clone()),
    }
}

fn stored(data: Bytes) -> StoredObject {
    StoredObject {
        etag: format!("\"{:x}\"", md5::compute(&data)),
        last_modified: Utc::now(),
        data,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.injected(Operation::ListBuckets, "", None).await?;
        let buckets = self.buckets.read().await;
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    #[instrument(skip(self))]
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        self.injected(Operation::ListObjects, bucket, None).await?;
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(Operation::ListObjects, bucket))?;

        // The token is the last key or common prefix handed out.
        let start_after = continuation_token.unwrap_or_default();
        let mut page = ListPage::default();
        let mut emitted = 0;
        let mut last = None;

        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let entry = common_prefix(key, prefix, delimiter);
            let position = entry.unwrap_or(key.as_str());
            if position <= start_after.as_str() {
                continue;
            }
            if page.common_prefixes.last().map(String::as_str) == Some(position) {
                continue;
            }
            if emitted == self.page_size {
                page.next_continuation_token = last;
                break;
            }
            match entry {
                Some(cp) => page.common_prefixes.push(cp.to_string()),
                None => page.objects.push(object_info(key, object)),
            }
            emitted += 1;
            last = Some(position.to_string());
        }

        debug!(
            folders = page.common_prefixes.len(),
            files = page.objects.len(),
            truncated = page.is_truncated(),
            "listed page"
        );
        Ok(page)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.injected(Operation::CreateBucket, bucket, None).await?;
        if !is_valid_bucket_name(bucket) {
            return Err(StorageError::new(
                ErrorKind::InvalidName,
                Operation::CreateBucket,
                bucket,
                None,
            ));
        }
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StorageError::new(
                ErrorKind::AlreadyExists,
                Operation::CreateBucket,
                bucket,
                None,
            ));
        }
        buckets.insert(bucket.to_string(), Bucket::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.injected(Operation::DeleteBucket, bucket, None).await?;
        let mut buckets = self.buckets.write().await;
        match buckets.get(bucket) {
            None => Err(no_such_bucket(Operation::DeleteBucket, bucket)),
            Some(objects) if !objects.is_empty() => Err(StorageError::new(
                ErrorKind::NotEmpty,
                Operation::DeleteBucket,
                bucket,
                None,
            )),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        stream: BodyStream,
        content_length: Option<u64>,
    ) -> Result<()> {
        self.injected(Operation::PutObject, bucket, Some(key)).await?;
        let data = collect_body(stream, content_length, bucket, key).await?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(Operation::PutObject, bucket))?;
        objects.insert(key.to_string(), stored(data));
        Ok(())
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> Result<BodyStream> {
        self.injected(Operation::GetObject, bucket, Some(key)).await?;
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(Operation::GetObject, bucket))?;
        let object = objects.get(key).ok_or_else(|| {
            StorageError::new(ErrorKind::NotFound, Operation::GetObject, bucket, Some(key))
        })?;
        Ok(body_from_bytes(object.data.clone()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.injected(Operation::DeleteObject, bucket, Some(key)).await?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(Operation::DeleteObject, bucket))?;
        objects.remove(key);
        Ok(())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<usize> {
        self.delete_many_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(Operation::DeleteObjects, bucket, None).await?;
        if keys.len() > self.batch_limit {
            return Err(StorageError::new(
                ErrorKind::Other,
                Operation::DeleteObjects,
                bucket,
                None,
            )
            .with_source(anyhow::anyhow!(
                "{} keys exceed the bulk delete limit of {}",
                keys.len(),
                self.batch_limit
            )));
        }
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(Operation::DeleteObjects, bucket))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(keys.len())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        self.injected(Operation::CopyObject, src_bucket, Some(src_key))
            .await?;
        let mut buckets = self.buckets.write().await;
        let data = buckets
            .get(src_bucket)
            .ok_or_else(|| no_such_bucket(Operation::CopyObject, src_bucket))?
            .get(src_key)
            .map(|object| object.data.clone())
            .ok_or_else(|| {
                StorageError::new(
                    ErrorKind::NotFound,
                    Operation::CopyObject,
                    src_bucket,
                    Some(src_key),
                )
            })?;
        let dest = buckets
            .get_mut(dest_bucket)
            .ok_or_else(|| no_such_bucket(Operation::CopyObject, dest_bucket))?;
        dest.insert(dest_key.to_string(), stored(data));
        Ok(())
    }

    fn delete_batch_limit(&self) -> usize {
        self.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend_with(keys: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_bucket("demo").await.unwrap();
        for key in keys {
            backend
                .put_stream("demo", key, body_from_bytes(Bytes::new()), Some(0))
                .await
                .unwrap();
        }
        backend
    }

    #[test]
    fn test_bucket_name_rules() {
        assert!(is_valid_bucket_name("demo"));
        assert!(is_valid_bucket_name("my.bucket-01"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name("Demo"));
        assert!(!is_valid_bucket_name("-demo"));
        assert!(!is_valid_bucket_name("demo-"));
        assert!(!is_valid_bucket_name("de..mo"));
        assert!(!is_valid_bucket_name("under_score"));
    }

    #[tokio::test]
    async fn test_delimiter_groups_into_common_prefixes() {
        let backend = backend_with(&["docs/", "docs/readme.txt", "images/logo.png", "top.txt"]).await;

        let root = backend.list_page("demo", "", Some("/"), None).await.unwrap();
        assert_eq!(root.common_prefixes, vec!["docs/", "images/"]);
        let keys: Vec<_> = root.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["top.txt"]);

        let docs = backend.list_page("demo", "docs/", Some("/"), None).await.unwrap();
        assert!(docs.common_prefixes.is_empty());
        let keys: Vec<_> = docs.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/", "docs/readme.txt"]);
    }

    #[tokio::test]
    async fn test_without_delimiter_lists_every_descendant() {
        let backend = backend_with(&["a/", "a/b/", "a/b/c.txt", "ab.txt"]).await;
        let page = backend.list_page("demo", "a/", None, None).await.unwrap();
        assert!(page.common_prefixes.is_empty());
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/", "a/b/", "a/b/c.txt"]);
    }

    #[tokio::test]
    async fn test_continuation_tokens_cover_every_entry_once() {
        let backend = backend_with(&["a/1", "a/2", "b.txt", "c/1", "c/2", "d.txt"])
            .await
            .with_page_size(2);

        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = backend.list_page("demo", "", Some("/"), token).await.unwrap();
            pages += 1;
            folders.extend(page.common_prefixes);
            files.extend(page.objects.into_iter().map(|o| o.key));
            token = page.next_continuation_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(pages, 2);
        assert_eq!(folders, vec!["a/", "c/"]);
        assert_eq!(files, vec!["b.txt", "d.txt"]);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.list_page("nope", "", Some("/"), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_bucket_requires_empty() {
        let backend = backend_with(&["x.txt"]).await;
        let err = backend.delete_bucket("demo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        backend.delete("demo", "x.txt").await.unwrap();
        backend.delete_bucket("demo").await.unwrap();
        assert!(backend.list_buckets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_many_enforces_batch_limit() {
        let backend = backend_with(&["1", "2", "3"]).await.with_delete_batch_limit(2);
        let keys: Vec<String> = vec!["1".into(), "2".into(), "3".into()];
        assert!(backend.delete_many("demo", &keys).await.is_err());
        assert_eq!(backend.delete_many("demo", &keys[..2]).await.unwrap(), 2);
        assert_eq!(backend.keys("demo").await.unwrap(), vec!["3"]);
        assert_eq!(backend.delete_many_calls(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let backend = backend_with(&["x.txt"]).await;
        backend
            .fail_next(Operation::DeleteObject, ErrorKind::Transient)
            .await;
        let err = backend.delete("demo", "x.txt").await.unwrap_err();
        assert!(err.is_retryable());
        backend.delete("demo", "x.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_etag_is_md5_of_content() {
        let backend = backend_with(&[]).await;
        backend
            .put_stream("demo", "hello.txt", body_from_bytes(Bytes::from("hello")), None)
            .await
            .unwrap();
        let page = backend.list_page("demo", "", None, None).await.unwrap();
        assert_eq!(
            page.objects[0].etag.as_deref(),
            Some("\"5d41402abc4b2a76b9719d911017c592\"")
        );
        assert_eq!(page.objects[0].size, Some(5));
    }
}
