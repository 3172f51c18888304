#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

//! Folder-style browsing and file management over S3-compatible object storage.
//!
//! Object stores are flat: a bucket maps keys to bytes. This crate projects
//! keys onto a folder tree using `/` as separator, and emulates folders with
//! zero-byte marker objects whose keys end in `/`.
//!
//! # Features
//! - Async operations with Tokio.
//! - One delimited listing per folder view, projected into folders, files,
//!   breadcrumbs and a parent link.
//! - Recursive folder and bucket deletion with paginated listing and batched
//!   bulk deletes.
//! - Server-side copy; move is copy then delete.
//! - Layered: Config → Backend trait (S3 or in-memory) → [`FileManager`].
//!
//! # Usage
//! ```no_run
//! use bucket_browser::{Config, FileManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         region: Some("eu-west-1".to_string()),
//!         ..Config::default()
//!     };
//!     let manager = FileManager::new(config).await?;
//!
//!     // Browse
//!     let view = manager.list_objects("my-bucket", "docs/").await?;
//!     for folder in &view.folders {
//!         println!("[dir] {folder}");
//!     }
//!     for file in &view.files {
//!         println!("      {} ({:?} bytes)", file.key, file.size);
//!     }
//!
//!     // Folders are marker objects
//!     manager.create_folder("my-bucket", "docs/drafts").await?;
//!
//!     // Upload into the current folder
//!     manager.upload_bytes("my-bucket", "docs/notes.txt", "hello".into()).await?;
//!
//!     // Move into a folder keeps the file name
//!     manager.move_file("my-bucket", "docs/notes.txt", "docs/drafts/").await?;
//!
//!     // Recursive delete
//!     manager.delete_folder("my-bucket", "docs/drafts/").await?;
//!
//!     Ok(())
//! }
//! ```

mod backends;
mod error;
mod file_manager;
mod folders;
pub mod hierarchy;

use std::env;

use chrono::{DateTime, Utc};

pub use crate::backends::common::{
    Backend, BodyStream, DEFAULT_DELETE_BATCH_LIMIT, ListPage, body_from_bytes,
};
pub use crate::backends::memory::MemoryBackend;
pub use crate::backends::s3::S3Backend;
pub use crate::error::{ConfigError, ErrorKind, Operation, Result, StorageError};
pub use crate::file_manager::FileManager;
pub use crate::folders::folder_marker;
pub use crate::hierarchy::FolderView;

/// Separator that turns flat keys into folders.
pub const DELIMITER: &str = "/";

/// Region used when neither the config nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the object-storage provider.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Region for the client and for new buckets (defaults to environment, then `us-east-1`).
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    pub endpoint_url: Option<String>,
    /// Static access key; the default credential chain is used when unset.
    pub access_key_id: Option<String>,
    /// Static secret key, required together with `access_key_id`.
    pub secret_access_key: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,
}

impl Config {
    /// Reads `AWS_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// `S3_ENDPOINT_URL` and `S3_FORCE_PATH_STYLE`.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let force_path_style = match env_var("S3_FORCE_PATH_STYLE") {
            None => false,
            Some(value) => parse_bool("S3_FORCE_PATH_STYLE", &value)?,
        };
        let config = Self {
            region: env_var("AWS_REGION"),
            endpoint_url: env_var("S3_ENDPOINT_URL"),
            access_key_id: env_var("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_var("AWS_SECRET_ACCESS_KEY"),
            force_path_style,
        };
        config.validate()?;
        Ok(config)
    }

    /// Static credentials must come as a pair.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => Err(ConfigError::IncompleteCredentials {
                present: "access_key_id",
                missing: "secret_access_key",
            }),
            (None, Some(_)) => Err(ConfigError::IncompleteCredentials {
                present: "secret_access_key",
                missing: "access_key_id",
            }),
            _ => Ok(()),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(variable: &str, value: &str) -> std::result::Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            variable: variable.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Metadata for an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Key inside the bucket (e.g. "docs/readme.txt").
    pub key: String,
    /// Object size in bytes.
    pub size: Option<u64>,
    /// Last modified timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// ETag (storage-specific).
    pub etag: Option<String>,
}

impl ObjectInfo {
    /// Folder markers are keys ending in the separator.
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with(DELIMITER)
    }
}
