//! Weather observation import from local CSV.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use mobility_map_models::{WeatherMetrics, WeatherRecord};
use mobility_map_store::MobilityStore;

use crate::{ImportError, ImportReport};

/// Records per bulk-insert batch.
const BATCH_SIZE: usize = 10_000;

/// Imports weather observations from a local CSV file.
///
/// Rows missing a column or carrying an unparseable value are accumulated
/// as error strings and skipped; only I/O and store failures are fatal.
///
/// # Errors
///
/// Returns [`ImportError`] if the file cannot be read or the store rejects
/// a write.
pub async fn import_weather(
    store: &dyn MobilityStore,
    csv_path: &Path,
    kind: &str,
) -> Result<ImportReport, ImportError> {
    let file_name = csv_path
        .file_name()
        .map_or_else(|| csv_path.display().to_string(), |n| {
            n.to_string_lossy().to_string()
        });
    log::info!("importing {kind} weather from {file_name}");

    let file = std::fs::File::open(csv_path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map(|h| h.iter().map(str::to_string).collect())
        .unwrap_or_default();

    let mut report = ImportReport::default();
    let mut row_errors = Vec::new();
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    for (i, result) in reader.records().enumerate() {
        let row_number = i + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                row_errors.push(format!("row {row_number}: {e}"));
                continue;
            }
        };

        match form_weather(&headers, &record, kind) {
            Ok(weather) => {
                batch.push(weather);
                if batch.len() == BATCH_SIZE {
                    report.inserted += store.insert_weather(&batch).await?;
                    batch.clear();
                }
            }
            Err(message) => row_errors.push(format!("row {row_number}: {message}")),
        }
    }
    if !batch.is_empty() {
        report.inserted += store.insert_weather(&batch).await?;
    }

    log::info!(
        "{file_name}: {} records inserted, {} row errors",
        report.inserted,
        row_errors.len()
    );
    report.file_errors.insert(file_name, row_errors);
    Ok(report)
}

/// Builds one [`WeatherRecord`] from a CSV row.
fn form_weather(
    headers: &[String],
    record: &csv::StringRecord,
    kind: &str,
) -> Result<WeatherRecord, String> {
    let field = |name: &str| -> Result<&str, String> {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| record.get(idx))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing field '{name}'"))
    };

    let date = parse_date(field("date")?)?;
    let country_code = field("country_code")?.to_string();
    let admin_code = field("admin_code")?.to_string();

    let temp = |name: &str| -> Result<f64, String> {
        let raw = field(name)?;
        raw.parse::<f64>()
            .map_err(|_| format!("invalid '{name}' value '{raw}'"))
    };

    Ok(WeatherRecord {
        date,
        kind: kind.to_string(),
        country_code,
        admin_code,
        data: WeatherMetrics {
            temp_mean: temp("temp_mean")?,
            temp_min: temp("temp_min")?,
            temp_max: temp("temp_max")?,
        },
    })
}

/// Parses an RFC3339 or `YYYY-MM-DD` date.
fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid 'date' value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use mobility_map_store::WeatherFilter;
    use mobility_map_store::memory::MemoryStore;

    use super::*;

    fn write_fixture(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn imports_valid_rows() {
        let path = write_fixture(
            "weather_import_test_valid.csv",
            "date,country_code,admin_code,temp_mean,temp_min,temp_max\n\
             2016-02-28,br,br-1,21.5,16.0,27.0\n\
             2016-02-28,br,br-2,24.0,19.0,30.0\n",
        );
        let store = Arc::new(MemoryStore::new());

        let report = import_weather(store.as_ref(), &path, "daily").await.unwrap();
        assert_eq!(report.inserted, 2);
        assert!(!report.has_row_errors());

        let records = store
            .find_weather(&WeatherFilter {
                admin_code: Some("br-1".to_string()),
                ..WeatherFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "daily");
        assert!((records[0].data.temp_mean - 21.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn bad_rows_are_reported_not_fatal() {
        let path = write_fixture(
            "weather_import_test_bad.csv",
            "date,country_code,admin_code,temp_mean,temp_min,temp_max\n\
             2016-02-28,br,br-1,21.5,16.0,27.0\n\
             not-a-date,br,br-2,24.0,19.0,30.0\n\
             2016-02-28,br,br-3,warm,19.0,30.0\n",
        );
        let store = Arc::new(MemoryStore::new());

        let report = import_weather(store.as_ref(), &path, "daily").await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.row_error_count(), 2);
        let errors = &report.file_errors["weather_import_test_bad.csv"];
        assert!(errors[0].contains("date"));
        assert!(errors[1].contains("temp_mean"));
    }
}
