use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::backends::common::{Backend, BodyStream, body_from_bytes};
use crate::backends::s3::S3Backend;
use crate::error::{ConfigError, ErrorKind, Operation, Result, StorageError};
use crate::hierarchy::{self, FolderView};
use crate::{Config, DELIMITER, folders};

/// File-manager operations over one shared storage backend.
///
/// Cloning is cheap; all clones talk to the same backend.
#[derive(Clone)]
pub struct FileManager {
    backend: Arc<dyn Backend>,
    reject_truncated_listings: bool,
    strict_folder_prefixes: bool,
}

impl FileManager {
    /// Connects to S3 (or an S3-compatible endpoint) using `config`.
    #[instrument(skip(config))]
    pub async fn new(config: Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let backend = S3Backend::connect(&config).await;
        info!(region = backend.region(), "object storage client ready");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Uses an already-built backend, e.g. [`crate::MemoryBackend`].
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            reject_truncated_listings: false,
            strict_folder_prefixes: false,
        }
    }

    /// Fail folder listings that do not fit in one page instead of
    /// returning the first page with `truncated` set.
    pub fn reject_truncated_listings(mut self, reject: bool) -> Self {
        self.reject_truncated_listings = reject;
        self
    }

    /// Make `delete_folder` append the missing `/` to its prefix and refuse
    /// the bucket root, so `docs` cannot take `docs2/` or the whole bucket
    /// with it.
    pub fn strict_folder_prefixes(mut self, strict: bool) -> Self {
        self.strict_folder_prefixes = strict;
        self
    }

    /// The shared gateway.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Names of every bucket visible to the credentials.
    #[instrument(skip(self))]
    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        self.backend.list_buckets().await
    }

    /// One folder of `bucket`: a single delimited listing page, projected.
    #[instrument(skip(self))]
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<FolderView> {
        let page = self
            .backend
            .list_page(bucket, prefix, Some(DELIMITER), None)
            .await?;
        if page.is_truncated() {
            if self.reject_truncated_listings {
                return Err(StorageError::new(
                    ErrorKind::Truncated,
                    Operation::ListObjects,
                    bucket,
                    Some(prefix),
                ));
            }
            warn!(
                bucket,
                prefix,
                "listing exceeds one page; showing the first page only"
            );
        }
        Ok(FolderView::project(bucket, prefix, page))
    }

    /// Creates a bucket; surrounding whitespace in `name` is ignored.
    #[instrument(skip(self))]
    pub async fn create_bucket(&self, name: &str) -> Result<()> {
        self.backend.create_bucket(name.trim()).await
    }

    /// Empties the bucket, then deletes it.
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let deleted = folders::delete_prefix(self.backend.as_ref(), name, "")
            .await
            .map_err(|e| e.during(Operation::DeleteBucket))?;
        info!(bucket = name, deleted, "bucket emptied");
        self.backend.delete_bucket(name).await
    }

    /// Uploads `stream` to `key`, overwriting any existing object.
    /// `content_length` is only a sizing hint.
    #[instrument(skip(self, stream))]
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        stream: BodyStream,
        content_length: Option<u64>,
    ) -> Result<()> {
        self.backend
            .put_stream(bucket, key, stream, content_length)
            .await
    }

    /// Uploads an in-memory payload.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn upload_bytes(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let len = data.len() as u64;
        self.upload_file(bucket, key, body_from_bytes(data), Some(len))
            .await
    }

    /// Streams the object's bytes.
    #[instrument(skip(self))]
    pub async fn download_file(&self, bucket: &str, key: &str) -> Result<BodyStream> {
        self.backend.get_stream(bucket, key).await
    }

    /// Creates the marker object for `folder_path` and returns its key.
    #[instrument(skip(self))]
    pub async fn create_folder(&self, bucket: &str, folder_path: &str) -> Result<String> {
        if folder_path.trim_matches('/').is_empty() {
            return Err(StorageError::new(
                ErrorKind::InvalidName,
                Operation::CreateFolder,
                bucket,
                Some(folder_path),
            ));
        }
        folders::create_marker(self.backend.as_ref(), bucket, folder_path)
            .await
            .map_err(|e| e.during(Operation::CreateFolder))
    }

    /// Deleting a missing key succeeds.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, bucket: &str, key: &str) -> Result<()> {
        self.backend.delete(bucket, key).await
    }

    /// Deletes every object whose key starts with `folder_prefix`, marker
    /// included. Returns the number of objects removed; a prefix matching
    /// nothing is a no-op.
    ///
    /// The prefix is used as given: `docs` also matches `docs2/` and
    /// `docsfile.txt`, and `""` empties the bucket. See
    /// [`FileManager::strict_folder_prefixes`].
    #[instrument(skip(self))]
    pub async fn delete_folder(&self, bucket: &str, folder_prefix: &str) -> Result<usize> {
        let prefix = if self.strict_folder_prefixes {
            if folder_prefix.trim_matches('/').is_empty() {
                return Err(StorageError::new(
                    ErrorKind::InvalidName,
                    Operation::DeleteFolder,
                    bucket,
                    Some(folder_prefix),
                ));
            }
            folders::folder_marker(folder_prefix)
        } else {
            folder_prefix.to_string()
        };
        let deleted = folders::delete_prefix(self.backend.as_ref(), bucket, &prefix)
            .await
            .map_err(|e| e.during(Operation::DeleteFolder))?;
        info!(bucket, prefix = %prefix, deleted, "folder deleted");
        Ok(deleted)
    }

    /// Server-side copy inside `bucket`. `destination` ending in `/` (or
    /// empty) is a folder and keeps the source file name. Returns the new key.
    /// Copying a file onto itself does nothing.
    #[instrument(skip(self))]
    pub async fn copy_file(&self, bucket: &str, src_key: &str, destination: &str) -> Result<String> {
        let dest_key = hierarchy::destination_key(src_key, destination);
        if dest_key == src_key {
            return Ok(dest_key);
        }
        self.backend.copy(bucket, src_key, bucket, &dest_key).await?;
        Ok(dest_key)
    }

    /// Copy, then delete the source. Not atomic: when the delete fails the
    /// copy stays in place and the error is returned.
    #[instrument(skip(self))]
    pub async fn move_file(&self, bucket: &str, src_key: &str, destination: &str) -> Result<String> {
        let dest_key = hierarchy::destination_key(src_key, destination);
        if dest_key == src_key {
            return Ok(dest_key);
        }
        self.backend.copy(bucket, src_key, bucket, &dest_key).await?;
        if let Err(e) = self.backend.delete(bucket, src_key).await {
            warn!(
                bucket,
                src_key,
                dest_key = %dest_key,
                error = %e,
                "move copied the object but could not delete the source"
            );
            return Err(e.during(Operation::MoveFile));
        }
        Ok(dest_key)
    }
}
