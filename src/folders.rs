use bytes::Bytes;
use tracing::{debug, instrument};

use crate::DELIMITER;
use crate::backends::common::{Backend, body_from_bytes};
use crate::error::Result;

/// Normalizes a folder path to its marker key by appending `/` when absent.
pub fn folder_marker(folder_path: &str) -> String {
    if folder_path.ends_with(DELIMITER) {
        folder_path.to_string()
    } else {
        format!("{folder_path}{DELIMITER}")
    }
}

/// Puts the zero-byte marker for `folder_path`. Re-creating is an overwrite.
#[instrument(skip(backend))]
pub(crate) async fn create_marker(
    backend: &dyn Backend,
    bucket: &str,
    folder_path: &str,
) -> Result<String> {
    let marker = folder_marker(folder_path);
    backend
        .put_stream(bucket, &marker, body_from_bytes(Bytes::new()), Some(0))
        .await?;
    Ok(marker)
}

/// Deletes every object whose key starts with `prefix`, following every
/// continuation token and deleting in batches no larger than the backend's
/// bulk-delete limit. Returns how many keys were deleted.
#[instrument(skip(backend))]
pub(crate) async fn delete_prefix(backend: &dyn Backend, bucket: &str, prefix: &str) -> Result<usize> {
    let limit = backend.delete_batch_limit();
    let mut pending: Vec<String> = Vec::with_capacity(limit);
    let mut deleted = 0;
    let mut continuation_token = None;

    loop {
        let page = backend
            .list_page(bucket, prefix, None, continuation_token)
            .await?;
        pending.extend(page.objects.into_iter().map(|obj| obj.key));
        while pending.len() >= limit {
            let batch: Vec<String> = pending.drain(..limit).collect();
            deleted += backend.delete_many(bucket, &batch).await?;
            debug!(deleted, "deleted batch");
        }
        continuation_token = page.next_continuation_token;
        if continuation_token.is_none() {
            break;
        }
    }

    if !pending.is_empty() {
        deleted += backend.delete_many(bucket, &pending).await?;
    }
    debug!(deleted, "prefix emptied");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[test]
    fn test_folder_marker_normalizes() {
        assert_eq!(folder_marker("docs"), "docs/");
        assert_eq!(folder_marker("docs/"), "docs/");
        assert_eq!(folder_marker("a/b"), "a/b/");
    }

    #[tokio::test]
    async fn test_delete_prefix_batches_across_pages() {
        let backend = MemoryBackend::new()
            .with_page_size(7)
            .with_delete_batch_limit(5);
        backend.create_bucket("demo").await.unwrap();
        for i in 0..23 {
            backend
                .put_stream(
                    "demo",
                    &format!("logs/{i:02}.txt"),
                    body_from_bytes(Bytes::new()),
                    Some(0),
                )
                .await
                .unwrap();
        }
        create_marker(&backend, "demo", "keep").await.unwrap();

        let deleted = delete_prefix(&backend, "demo", "logs/").await.unwrap();
        assert_eq!(deleted, 23);
        // 4 full batches of 5 plus the remaining 3
        assert_eq!(backend.delete_many_calls(), 5);
        assert_eq!(backend.keys("demo").await.unwrap(), vec!["keep/"]);
    }

    #[tokio::test]
    async fn test_delete_prefix_with_nothing_to_delete() {
        let backend = MemoryBackend::new();
        backend.create_bucket("demo").await.unwrap();
        assert_eq!(delete_prefix(&backend, "demo", "ghost/").await.unwrap(), 0);
        assert_eq!(backend.delete_many_calls(), 0);
    }
}
