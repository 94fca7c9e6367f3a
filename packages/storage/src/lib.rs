#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Blob storage access for the mobility importer.
//!
//! The importer reads provider exports out of cloud blob storage organized
//! as collection/blob: each collection (e.g. `traffic`, `midt`) holds CSV
//! or gzipped-CSV files. [`BlobStorage`] abstracts that layout;
//! [`S3Storage`] talks to any S3-compatible bucket (collections are
//! top-level prefixes), and [`LocalStorage`] serves a directory tree for
//! tests and offline runs.
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `MOBILITY_BLOB_BUCKET` | Yes | Bucket holding the provider exports |
//! | `MOBILITY_BLOB_ENDPOINT` | Yes | S3-compatible endpoint URL |
//! | `MOBILITY_BLOB_ACCESS_KEY_ID` | Yes | Access key |
//! | `MOBILITY_BLOB_SECRET_ACCESS_KEY` | Yes | Secret key |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};

/// Errors that can occur during blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// Listing a collection or the bucket root failed.
    #[error("Failed to list {bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Downloading a blob failed.
    #[error("Failed to download {bucket}/{key}: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error reading or writing local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maximum number of download attempts (initial + one retry).
const MAX_DOWNLOAD_ATTEMPTS: u32 = 2;

/// Delay before the download retry.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Read access to collection/blob organized storage.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Lists collection names.
    async fn list_collections(&self) -> Result<Vec<String>, StorageError>;

    /// Lists blob names within a collection. Unknown collections yield an
    /// empty list.
    async fn list_blob_names(&self, collection: &str) -> Result<Vec<String>, StorageError>;

    /// Downloads one blob into `dest_dir`, returning the path of the local
    /// file (named after the blob).
    async fn download_blob(
        &self,
        collection: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, StorageError>;
}

/// Blob storage backed by an S3-compatible bucket.
///
/// Collections are the bucket's top-level prefixes; blobs are the objects
/// under them.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    /// Creates a client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingEnv`] if any required variable is
    /// unset.
    pub fn from_env() -> Result<Self, StorageError> {
        let bucket = require_env("MOBILITY_BLOB_BUCKET")?;
        let endpoint = require_env("MOBILITY_BLOB_ENDPOINT")?;
        let access_key = require_env("MOBILITY_BLOB_ACCESS_KEY_ID")?;
        let secret_key = require_env("MOBILITY_BLOB_SECRET_ACCESS_KEY")?;

        let creds = Credentials::new(&access_key, &secret_key, None, None, "blob-env");

        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(&endpoint)
            .region(Region::new("auto"))
            .credentials_provider(creds)
            .force_path_style(true)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket,
        })
    }

    /// Lists all object keys under a prefix, following pagination.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| StorageError::List {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    /// Single download attempt.
    async fn download_once(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Download {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        tokio::fs::write(local_path, bytes.into_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn list_collections(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.list_keys("").await?;
        let mut names = BTreeSet::new();
        for key in &keys {
            if let Some(name) = key.split('/').next().filter(|n| !n.is_empty())
                && key.contains('/')
            {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn list_blob_names(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{collection}/");
        let keys = self.list_keys(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn download_blob(
        &self,
        collection: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let key = format!("{collection}/{name}");
        let local_path = dest_dir.join(name);
        log::info!("Downloading {}/{key} -> {}", self.bucket, local_path.display());

        let mut last_err: Option<StorageError> = None;

        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            match self.download_once(&key, &local_path).await {
                Ok(()) => return Ok(local_path),
                Err(e @ StorageError::Download { .. }) if attempt < MAX_DOWNLOAD_ATTEMPTS => {
                    log::warn!(
                        "  download attempt {attempt}/{MAX_DOWNLOAD_ATTEMPTS} failed, \
                         retrying in {RETRY_DELAY:.1?}..."
                    );
                    last_err = Some(e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| StorageError::Download {
            bucket: self.bucket.clone(),
            key,
            source: "all download attempts exhausted".into(),
        }))
    }
}

/// Blob storage backed by a local directory tree.
///
/// Collections are the root's immediate subdirectories; blobs are the files
/// inside them.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Creates storage rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn list_collections(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_blob_names(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn download_blob(
        &self,
        collection: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let source = self.root.join(collection).join(name);
        let dest = dest_dir.join(name);
        tokio::fs::copy(&source, &dest).await?;
        Ok(dest)
    }
}

/// Reads a required environment variable.
fn require_env(name: &str) -> Result<String, StorageError> {
    std::env::var(name).map_err(|_| StorageError::MissingEnv {
        name: name.to_string(),
    })
}
