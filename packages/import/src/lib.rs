#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Bulk import pipelines for the mobility map.
//!
//! Three importers feed the document store:
//! - [`mobility::MobilityImporter`] syncs provider CSV exports out of blob
//!   storage, deduplicating on source file name, through two serialized
//!   work queues (fetch and save).
//! - [`admins::import_admins`] replaces a country's admin boundaries from a
//!   `GeoJSON` file and regenerates its topology blobs.
//! - [`weather::import_weather`] loads weather observation CSVs.
//!
//! Row-level problems (missing fields, unparseable values) are accumulated
//! as error strings in the [`ImportReport`] and never abort a run; I/O,
//! storage, and store failures are fatal.

pub mod admins;
pub mod mobility;
pub mod queue;
pub mod weather;

use std::collections::BTreeMap;

use mobility_map_storage::StorageError;
use mobility_map_store::StoreError;

/// Errors that can occur during imports.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Blob storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Document store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error on a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `GeoJSON` file could not be parsed.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The input is not the expected `GeoJSON` shape.
    #[error("Invalid GeoJSON input: {message}")]
    InvalidGeoJson {
        /// Description of what was expected.
        message: String,
    },

    /// A work queue shut down before the job could be enqueued.
    #[error("Work queue closed")]
    QueueClosed,

    /// A work queue's worker task terminated abnormally.
    #[error("Work queue worker terminated abnormally")]
    QueueWorker,
}

/// Outcome of an import run.
///
/// Row-level errors are per source file; an entry with an empty list means
/// the file was processed cleanly.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Per-file row error strings, keyed by source file name.
    pub file_errors: BTreeMap<String, Vec<String>>,
    /// Number of records written to the store.
    pub inserted: u64,
}

impl ImportReport {
    /// Whether any file produced row-level errors.
    #[must_use]
    pub fn has_row_errors(&self) -> bool {
        self.file_errors.values().any(|errors| !errors.is_empty())
    }

    /// Total number of row-level errors across all files.
    #[must_use]
    pub fn row_error_count(&self) -> usize {
        self.file_errors.values().map(Vec::len).sum()
    }
}
