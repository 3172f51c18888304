use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Classification of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bucket or key does not exist.
    NotFound,
    /// Bucket name is already taken.
    AlreadyExists,
    /// Bucket still holds objects.
    NotEmpty,
    /// Bucket name, key or folder path was rejected.
    InvalidName,
    /// Requested region does not match the gateway's region.
    RegionMismatch,
    /// Credentials were rejected or lack permission.
    AccessDenied,
    /// Network failure or throttling; the caller may retry.
    Transient,
    /// A listing held more entries than one page returned.
    Truncated,
    /// Anything the provider reported that has no dedicated kind.
    Other,
}

impl ErrorKind {
    /// Maps an S3 error code to a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "NoSuchBucket" | "NoSuchKey" | "NotFound" => Self::NotFound,
            "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => Self::AlreadyExists,
            "BucketNotEmpty" => Self::NotEmpty,
            "InvalidBucketName" | "KeyTooLongError" => Self::InvalidName,
            "IllegalLocationConstraintException"
            | "InvalidLocationConstraint"
            | "AuthorizationHeaderMalformed" => Self::RegionMismatch,
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => Self::AccessDenied,
            "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" => {
                Self::Transient
            }
            _ => Self::Other,
        }
    }

    /// Only transient failures are worth re-issuing unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::NotEmpty => "not empty",
            Self::InvalidName => "invalid name",
            Self::RegionMismatch => "region mismatch",
            Self::AccessDenied => "access denied",
            Self::Transient => "transient failure",
            Self::Truncated => "listing truncated",
            Self::Other => "provider error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation that failed, either a gateway primitive or a file-manager action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Listing all buckets.
    ListBuckets,
    /// Listing objects under a prefix.
    ListObjects,
    /// Creating a bucket.
    CreateBucket,
    /// Deleting a bucket.
    DeleteBucket,
    /// Uploading an object.
    PutObject,
    /// Downloading an object.
    GetObject,
    /// Deleting one object.
    DeleteObject,
    /// Bulk-deleting a batch of objects.
    DeleteObjects,
    /// Server-side copy.
    CopyObject,
    /// Creating a folder marker.
    CreateFolder,
    /// Recursively deleting a folder.
    DeleteFolder,
    /// Moving a file (copy then delete).
    MoveFile,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::ListBuckets => "list_buckets",
            Self::ListObjects => "list_objects",
            Self::CreateBucket => "create_bucket",
            Self::DeleteBucket => "delete_bucket",
            Self::PutObject => "put_object",
            Self::GetObject => "get_object",
            Self::DeleteObject => "delete_object",
            Self::DeleteObjects => "delete_objects",
            Self::CopyObject => "copy_object",
            Self::CreateFolder => "create_folder",
            Self::DeleteFolder => "delete_folder",
            Self::MoveFile => "move_file",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed storage operation: what kind of failure, which call, and on what.
#[derive(Debug, Error)]
#[error("{operation} failed on {}: {kind}", target(.bucket, .key))]
pub struct StorageError {
    kind: ErrorKind,
    operation: Operation,
    bucket: String,
    key: Option<String>,
    #[source]
    source: Option<anyhow::Error>,
}

fn target(bucket: &str, key: &Option<String>) -> String {
    match key {
        Some(key) => format!("{bucket}/{key}"),
        None if bucket.is_empty() => "<all buckets>".to_string(),
        None => bucket.to_string(),
    }
}

impl StorageError {
    /// Error without an underlying cause.
    pub fn new(kind: ErrorKind, operation: Operation, bucket: &str, key: Option<&str>) -> Self {
        Self {
            kind,
            operation,
            bucket: bucket.to_string(),
            key: key.map(str::to_string),
            source: None,
        }
    }

    /// Attaches the underlying provider or I/O error.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// What went wrong.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The call that failed.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Bucket the call targeted; empty for `list_buckets`.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key or prefix the call targeted, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// See [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Re-labels the error with the higher-level action it was part of.
    pub(crate) fn during(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }
}

/// Invalid client configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Only half of a static credential pair was supplied.
    #[error("{present} is set but {missing} is not")]
    IncompleteCredentials {
        /// The setting that was given.
        present: &'static str,
        /// The setting it needs alongside.
        missing: &'static str,
    },

    /// An environment variable could not be parsed.
    #[error("invalid value for {variable}: {value}")]
    InvalidValue {
        /// Variable name.
        variable: String,
        /// The rejected value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_to_kinds() {
        assert_eq!(ErrorKind::from_code("NoSuchKey"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_code("NoSuchBucket"), ErrorKind::NotFound);
        assert_eq!(
            ErrorKind::from_code("BucketAlreadyOwnedByYou"),
            ErrorKind::AlreadyExists
        );
        assert_eq!(ErrorKind::from_code("BucketNotEmpty"), ErrorKind::NotEmpty);
        assert_eq!(
            ErrorKind::from_code("IllegalLocationConstraintException"),
            ErrorKind::RegionMismatch
        );
        assert_eq!(ErrorKind::from_code("SlowDown"), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_code("SomethingNew"), ErrorKind::Other);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Truncated.is_retryable());
    }

    #[test]
    fn test_display_names_operation_and_target() {
        let err = StorageError::new(
            ErrorKind::NotFound,
            Operation::GetObject,
            "demo",
            Some("docs/readme.txt"),
        );
        assert_eq!(
            err.to_string(),
            "get_object failed on demo/docs/readme.txt: not found"
        );

        let err = StorageError::new(ErrorKind::Transient, Operation::ListBuckets, "", None);
        assert_eq!(
            err.to_string(),
            "list_buckets failed on <all buckets>: transient failure"
        );
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error;

        let err = StorageError::new(ErrorKind::Other, Operation::PutObject, "demo", Some("a"))
            .with_source(anyhow::anyhow!("connection reset"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_during_relabels_operation() {
        let err = StorageError::new(ErrorKind::NotFound, Operation::DeleteObject, "demo", None)
            .during(Operation::MoveFile);
        assert_eq!(err.operation(), Operation::MoveFile);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
