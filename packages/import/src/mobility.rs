//! Remote mobility sync: blob storage to document store.
//!
//! One run lists the provider collections, diffs the blob names against the
//! store's dedup index, and pulls every file not yet represented. Files run
//! through a fetch queue (download + parse, one file at a time) which feeds
//! batches of records onto a save queue (bulk insert, one batch at a time).
//! The two queues decouple download pacing from write pacing.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use flate2::read::GzDecoder;
use mobility_map_models::MobilityRecord;
use mobility_map_storage::BlobStorage;
use mobility_map_store::MobilityStore;

use crate::queue::{QueueHandle, SerialQueue};
use crate::{ImportError, ImportReport};

/// Collections imported when no override is configured.
const DEFAULT_COLLECTIONS: &[&str] = &["traffic", "midt"];

/// Records per bulk-insert batch.
const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Upstream provider recorded on imported records.
const DEFAULT_PROVIDER: &str = "amadeus";

/// Window length in days for provider records.
const DURATION_DAYS: i64 = 7;

/// Pending-job capacity per work queue.
const QUEUE_CAPACITY: usize = 64;

/// Syncs provider mobility exports from blob storage into the store.
pub struct MobilityImporter {
    store: Arc<dyn MobilityStore>,
    storage: Arc<dyn BlobStorage>,
    staging_dir: PathBuf,
    collections: Vec<String>,
    provider: String,
    batch_size: usize,
}

impl MobilityImporter {
    /// Creates an importer with the default collection whitelist, provider,
    /// and batch size.
    #[must_use]
    pub fn new(
        store: Arc<dyn MobilityStore>,
        storage: Arc<dyn BlobStorage>,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            storage,
            staging_dir,
            collections: DEFAULT_COLLECTIONS.iter().map(|&c| c.to_string()).collect(),
            provider: DEFAULT_PROVIDER.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Overrides the collection whitelist.
    #[must_use]
    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }

    /// Overrides the provider recorded on imported records.
    #[must_use]
    pub fn with_provider(mut self, provider: String) -> Self {
        self.provider = provider;
        self
    }

    /// Overrides the bulk-insert batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs one sync pass.
    ///
    /// Resolves only after the fetch queue has drained and every queued
    /// save has completed. Re-running against unchanged remote files
    /// performs zero writes.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError`] on list, download, or insert failure.
    /// Row-level problems are reported in the [`ImportReport`] instead.
    pub async fn run(&self) -> Result<ImportReport, ImportError> {
        let collections: Vec<String> = self
            .storage
            .list_collections()
            .await?
            .into_iter()
            .filter(|c| self.collections.contains(c))
            .collect();
        log::info!("importing collections: {collections:?}");

        let imported = self.store.imported_source_files().await?;

        let mut needed: Vec<(String, String)> = Vec::new();
        for collection in &collections {
            let names = self.storage.list_blob_names(collection).await?;
            let done = imported.get(collection);
            for name in names {
                if done.is_none_or(|files| !files.contains(&name)) {
                    needed.push((collection.clone(), name));
                }
            }
        }
        log::info!("{} new files to import", needed.len());

        let save_queue = SerialQueue::spawn(QUEUE_CAPACITY);
        let fetch_queue = SerialQueue::spawn(QUEUE_CAPACITY);

        let file_errors: Arc<std::sync::Mutex<BTreeMap<String, Vec<String>>>> =
            Arc::new(std::sync::Mutex::new(BTreeMap::new()));
        let inserted = Arc::new(AtomicU64::new(0));

        for (collection, name) in needed {
            let job = fetch_file(
                Arc::clone(&self.store),
                Arc::clone(&self.storage),
                self.staging_dir.clone(),
                collection,
                name,
                self.provider.clone(),
                self.batch_size,
                save_queue.handle(),
                Arc::clone(&file_errors),
                Arc::clone(&inserted),
            );
            if fetch_queue.push(job).await.is_err() {
                // Worker already failed; the cause surfaces from join below.
                break;
            }
        }

        // Drain the save queue even when a fetch failed, so batches queued
        // before the failure finish writing before the run resolves.
        let fetch_outcome = fetch_queue.join().await;
        let save_outcome = save_queue.join().await;
        fetch_outcome?;
        save_outcome?;

        let file_errors = file_errors
            .lock()
            .map_err(|_| ImportError::QueueWorker)?
            .clone();

        Ok(ImportReport {
            file_errors,
            inserted: inserted.load(Ordering::SeqCst),
        })
    }
}

/// Downloads one blob, parses it, and enqueues its record batches onto the
/// save queue.
#[allow(clippy::too_many_arguments)]
async fn fetch_file(
    store: Arc<dyn MobilityStore>,
    storage: Arc<dyn BlobStorage>,
    staging_dir: PathBuf,
    collection: String,
    name: String,
    provider: String,
    batch_size: usize,
    save: QueueHandle,
    file_errors: Arc<std::sync::Mutex<BTreeMap<String, Vec<String>>>>,
    inserted: Arc<AtomicU64>,
) -> Result<(), ImportError> {
    log::info!("fetching {collection}/{name}");
    let path = storage.download_blob(&collection, &name, &staging_dir).await?;

    let parsed = parse_mobility_csv(&path, &collection, &name, &provider, batch_size);

    if let Err(e) = tokio::fs::remove_file(&path).await {
        log::warn!("failed to remove staging file {}: {e}", path.display());
    }
    let (batches, row_errors) = parsed?;

    log::info!(
        "{name}: {} batches, {} row errors",
        batches.len(),
        row_errors.len()
    );
    file_errors
        .lock()
        .map_err(|_| ImportError::QueueWorker)?
        .insert(name.clone(), row_errors);

    for batch in batches {
        let store = Arc::clone(&store);
        let inserted = Arc::clone(&inserted);
        save.push(async move {
            let count = store.insert_mobility(&batch).await?;
            inserted.fetch_add(count, Ordering::SeqCst);
            Ok(())
        })
        .await?;
    }

    Ok(())
}

/// Parses a provider CSV (gzip-transparent) into record batches plus
/// accumulated row error strings.
fn parse_mobility_csv(
    path: &Path,
    collection: &str,
    source_file: &str,
    provider: &str,
    batch_size: usize,
) -> Result<(Vec<Vec<MobilityRecord>>, Vec<String>), ImportError> {
    let file = std::fs::File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = match csv_reader.headers() {
        Ok(headers) => headers.iter().map(str::to_string).collect(),
        Err(e) => return Ok((Vec::new(), vec![format!("unreadable header row: {e}")])),
    };

    let mut batches = Vec::new();
    let mut batch = Vec::with_capacity(batch_size);
    let mut row_errors = Vec::new();

    for (i, result) in csv_reader.records().enumerate() {
        let row_number = i + 2; // 1-based, after the header row
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                row_errors.push(format!("row {row_number}: {e}"));
                continue;
            }
        };

        let field = |name: &str| -> Option<String> {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|idx| record.get(idx))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match form_mobility(&field, collection, source_file, provider) {
            Ok(mobility) => {
                batch.push(mobility);
                if batch.len() == batch_size {
                    batches.push(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
                }
            }
            Err(message) => row_errors.push(format!("row {row_number}: {message}")),
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }

    Ok((batches, row_errors))
}

/// Builds one [`MobilityRecord`] from a row's field accessor.
///
/// The date comes from either `year` + `week` (week offsets from January
/// 1st of the year) or an explicit `date` field; `date_to` is always seven
/// days later.
fn form_mobility(
    field: &dyn Fn(&str) -> Option<String>,
    collection: &str,
    source_file: &str,
    provider: &str,
) -> Result<MobilityRecord, String> {
    let date = parse_row_date(field)?;

    let required = |name: &str| -> Result<String, String> {
        field(name).ok_or_else(|| format!("missing field '{name}'"))
    };

    let origin_country_code = required("origin_iso")?;
    let destination_country_code = required("dest_iso")?;
    let origin_admin_code = required("origin_id")?;
    let destination_admin_code = required("dest_id")?;

    let pax = required("pax")?;
    let count = pax
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| format!("invalid 'pax' value '{pax}'"))?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = count as u64;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(MobilityRecord {
        date,
        date_to: date + Duration::days(DURATION_DAYS),
        kind: collection.to_string(),
        provider: provider.to_string(),
        duration: DURATION_DAYS as u32,
        source_file: source_file.to_string(),
        origin_country_code,
        destination_country_code,
        origin_admin_code,
        destination_admin_code,
        count,
    })
}

/// Resolves a row's date from `year` + `week` or an explicit `date` field.
fn parse_row_date(field: &dyn Fn(&str) -> Option<String>) -> Result<DateTime<Utc>, String> {
    if let Some(year) = field("year") {
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid 'year' value '{year}'"))?;
        let week = field("week").ok_or_else(|| "missing field 'week'".to_string())?;
        let week: i64 = week
            .parse()
            .map_err(|_| format!("invalid 'week' value '{week}'"))?;

        let jan_first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| format!("invalid 'year' value '{year}'"))?;
        return (jan_first + Duration::weeks(week))
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| "unrepresentable date".to_string());
    }

    let raw = field("date").ok_or_else(|| "missing a usable date".to_string())?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid 'date' value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use async_trait::async_trait;
    use mobility_map_storage::{LocalStorage, StorageError};
    use mobility_map_store::memory::MemoryStore;

    use super::*;

    const HEADER: &str = "origin_iso,dest_iso,origin_id,dest_id,pax,date\n";

    fn fixture_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("traffic")).unwrap();
        root
    }

    fn nine_row_csv() -> String {
        let mut csv = String::from(HEADER);
        for i in 1..=8 {
            csv.push_str(&format!("BRA,BRA,br-{i},br-{i},{},2016-02-28\n", i * 10));
        }
        // Missing pax: excluded from its batch, run continues.
        csv.push_str("BRA,BRA,br-9,br-9,,2016-02-28\n");
        csv
    }

    fn importer(root: &Path, store: Arc<MemoryStore>) -> MobilityImporter {
        MobilityImporter::new(
            store,
            Arc::new(LocalStorage::new(root.to_path_buf())),
            root.join("staging"),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn imports_valid_rows_and_reports_invalid_ones() {
        let root = fixture_root("mobility_import_test_rows");
        std::fs::write(root.join("traffic/2016_09.csv"), nine_row_csv()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = importer(&root, Arc::clone(&store)).run().await.unwrap();

        assert_eq!(report.inserted, 8);
        assert_eq!(store.count_mobility().await.unwrap(), 8);
        assert_eq!(report.file_errors["2016_09.csv"].len(), 1);
        assert!(report.file_errors["2016_09.csv"][0].contains("pax"));
        assert!(report.has_row_errors());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_run_is_a_no_op() {
        let root = fixture_root("mobility_import_test_idempotent");
        std::fs::write(root.join("traffic/2016_09.csv"), nine_row_csv()).unwrap();

        let store = Arc::new(MemoryStore::new());
        importer(&root, Arc::clone(&store)).run().await.unwrap();
        let second = importer(&root, Arc::clone(&store)).run().await.unwrap();

        assert_eq!(second.inserted, 0);
        assert!(second.file_errors.is_empty());
        assert_eq!(store.count_mobility().await.unwrap(), 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_whitelisted_collections_are_imported() {
        let root = fixture_root("mobility_import_test_whitelist");
        std::fs::create_dir_all(root.join("schedule")).unwrap();
        std::fs::write(root.join("traffic/a.csv"), nine_row_csv()).unwrap();
        std::fs::write(root.join("schedule/b.csv"), nine_row_csv()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = importer(&root, Arc::clone(&store)).run().await.unwrap();

        assert_eq!(report.inserted, 8);
        assert!(report.file_errors.contains_key("a.csv"));
        assert!(!report.file_errors.contains_key("b.csv"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gzipped_blobs_are_expanded() {
        let root = fixture_root("mobility_import_test_gzip");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(nine_row_csv().as_bytes()).unwrap();
        std::fs::write(root.join("traffic/2016_09.csv.gz"), encoder.finish().unwrap()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = importer(&root, Arc::clone(&store)).run().await.unwrap();

        assert_eq!(report.inserted, 8);
        assert_eq!(report.file_errors["2016_09.csv.gz"].len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batches_split_at_configured_size() {
        let root = fixture_root("mobility_import_test_batches");
        let mut csv = String::from(HEADER);
        for i in 0..7 {
            csv.push_str(&format!("BRA,BRA,br-{i},br-{i},5,2016-02-28\n"));
        }
        std::fs::write(root.join("traffic/a.csv"), csv).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = importer(&root, Arc::clone(&store))
            .with_batch_size(3)
            .run()
            .await
            .unwrap();

        // 3 + 3 + 1: the final partial batch is flushed too.
        assert_eq!(report.inserted, 7);
        assert_eq!(store.count_mobility().await.unwrap(), 7);
    }

    /// Directory-backed storage whose download of one named blob always
    /// fails.
    struct FlakyStorage {
        inner: LocalStorage,
        failing: &'static str,
    }

    #[async_trait]
    impl BlobStorage for FlakyStorage {
        async fn list_collections(&self) -> Result<Vec<String>, StorageError> {
            self.inner.list_collections().await
        }

        async fn list_blob_names(&self, collection: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list_blob_names(collection).await
        }

        async fn download_blob(
            &self,
            collection: &str,
            name: &str,
            dest_dir: &Path,
        ) -> Result<PathBuf, StorageError> {
            if name == self.failing {
                return Err(StorageError::Download {
                    bucket: "fixture".to_string(),
                    key: format!("{collection}/{name}"),
                    source: "connection reset".into(),
                });
            }
            self.inner.download_blob(collection, name, dest_dir).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fatal_download_still_drains_queued_saves() {
        let root = fixture_root("mobility_import_test_drain");
        std::fs::write(root.join("traffic/a.csv"), nine_row_csv()).unwrap();
        std::fs::write(root.join("traffic/z.csv"), nine_row_csv()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(FlakyStorage {
            inner: LocalStorage::new(root.clone()),
            failing: "z.csv",
        });
        let result = MobilityImporter::new(
            Arc::clone(&store) as Arc<dyn MobilityStore>,
            storage,
            root.join("staging"),
        )
            .run()
            .await;

        assert!(matches!(result, Err(ImportError::Storage(_))));
        // a.csv's batch was queued before the failure and completes anyway.
        assert_eq!(store.count_mobility().await.unwrap(), 8);
    }

    #[test]
    fn week_dates_offset_from_january_first() {
        let headers = [
            ("year", "2016"),
            ("week", "2"),
            ("origin_iso", "BRA"),
            ("dest_iso", "COL"),
            ("origin_id", "br-1"),
            ("dest_id", "co-1"),
            ("pax", "12"),
        ];
        let field = |name: &str| -> Option<String> {
            headers
                .iter()
                .find(|(h, _)| *h == name)
                .map(|&(_, v)| v.to_string())
        };

        let record = form_mobility(&field, "traffic", "f.csv", "amadeus").unwrap();
        assert_eq!(record.date.to_rfc3339(), "2016-01-15T00:00:00+00:00");
        assert_eq!(record.date_to - record.date, Duration::days(7));
        assert_eq!(record.duration, 7);
        assert_eq!(record.count, 12);
        assert_eq!(record.kind, "traffic");
        assert_eq!(record.provider, "amadeus");
    }
}
