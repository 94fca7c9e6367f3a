#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Document store repository for the mobility map.
//!
//! [`MobilityStore`] is the seam between the aggregation/import layers and
//! the storage backend: insert-many, find-with-filter, latest-date lookup
//! (sort-descending-limit-1), and delete-by-filter. Two implementations are
//! provided: [`duck::DuckStore`] persists to a `DuckDB` file, and
//! [`memory::MemoryStore`] keeps everything in process for tests.

pub mod duck;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mobility_map_models::{Admin, MobilityRecord, TopologyBlob, WeatherRecord};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// I/O error reading or creating the database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be converted to its domain type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// A resolved condition filter on the `date` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCondition {
    /// Exact-match on a single instant.
    At(DateTime<Utc>),
    /// Inclusive range: `start <= date <= end`.
    Range {
        /// Earliest matching instant (inclusive).
        start: DateTime<Utc>,
        /// Latest matching instant (inclusive).
        end: DateTime<Utc>,
    },
}

impl DateCondition {
    /// Whether `date` satisfies this condition. Range bounds are inclusive
    /// on both ends.
    #[must_use]
    pub fn matches(&self, date: DateTime<Utc>) -> bool {
        match self {
            Self::At(at) => date == *at,
            Self::Range { start, end } => date >= *start && date <= *end,
        }
    }
}

/// Filter for mobility record queries. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MobilityFilter {
    /// Origin country code (provider representation, upper-case).
    pub origin_country_code: Option<String>,
    /// Destination country code (provider representation, upper-case).
    pub destination_country_code: Option<String>,
    /// Origin admin code.
    pub origin_admin_code: Option<String>,
    /// Destination admin code.
    pub destination_admin_code: Option<String>,
    /// Condition on the record date.
    pub date: Option<DateCondition>,
}

impl MobilityFilter {
    /// Whether `record` satisfies every set field of this filter.
    #[must_use]
    pub fn matches(&self, record: &MobilityRecord) -> bool {
        self.origin_country_code
            .as_ref()
            .is_none_or(|c| record.origin_country_code == *c)
            && self
                .destination_country_code
                .as_ref()
                .is_none_or(|c| record.destination_country_code == *c)
            && self
                .origin_admin_code
                .as_ref()
                .is_none_or(|c| record.origin_admin_code == *c)
            && self
                .destination_admin_code
                .as_ref()
                .is_none_or(|c| record.destination_admin_code == *c)
            && self.date.is_none_or(|d| d.matches(record.date))
    }
}

/// Filter for weather record queries. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct WeatherFilter {
    /// ISO alpha-2 country code, lowercase.
    pub country_code: Option<String>,
    /// Admin code.
    pub admin_code: Option<String>,
    /// Condition on the record date.
    pub date: Option<DateCondition>,
}

impl WeatherFilter {
    /// Whether `record` satisfies every set field of this filter.
    #[must_use]
    pub fn matches(&self, record: &WeatherRecord) -> bool {
        self.country_code
            .as_ref()
            .is_none_or(|c| record.country_code == *c)
            && self.admin_code.as_ref().is_none_or(|c| record.admin_code == *c)
            && self.date.is_none_or(|d| d.matches(record.date))
    }
}

/// Dedup index: source file names already reflected in stored mobility
/// records, grouped by collection kind.
pub type ImportedFiles = BTreeMap<String, BTreeSet<String>>;

/// The document store contract.
///
/// Admins and topologies are replaced wholesale per country; mobility and
/// weather records are append-only. Readers never mutate.
#[async_trait]
pub trait MobilityStore: Send + Sync {
    /// Inserts admins, returning the number inserted.
    async fn insert_admins(&self, admins: &[Admin]) -> Result<u64, StoreError>;

    /// Deletes all admins for a country, returning the number deleted.
    async fn delete_admins(&self, country_code: &str) -> Result<u64, StoreError>;

    /// Returns all admins for a country, ordered by admin code. Unknown
    /// countries yield an empty list, never an error.
    async fn find_admins(&self, country_code: &str) -> Result<Vec<Admin>, StoreError>;

    /// Bulk-inserts mobility records, returning the number inserted.
    async fn insert_mobility(&self, records: &[MobilityRecord]) -> Result<u64, StoreError>;

    /// Returns all mobility records matching `filter`.
    async fn find_mobility(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Vec<MobilityRecord>, StoreError>;

    /// Returns the most recent `date` among mobility records matching
    /// `filter`, or `None` if no record matches.
    async fn latest_mobility_date(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Total number of stored mobility records.
    async fn count_mobility(&self) -> Result<u64, StoreError>;

    /// Returns the importer dedup index: `kind -> set of source_file`
    /// derived from stored mobility records.
    async fn imported_source_files(&self) -> Result<ImportedFiles, StoreError>;

    /// Bulk-inserts weather records, returning the number inserted.
    async fn insert_weather(&self, records: &[WeatherRecord]) -> Result<u64, StoreError>;

    /// Returns all weather records matching `filter`.
    async fn find_weather(&self, filter: &WeatherFilter)
    -> Result<Vec<WeatherRecord>, StoreError>;

    /// Returns the most recent `date` among weather records matching
    /// `filter`, or `None` if no record matches.
    async fn latest_weather_date(
        &self,
        filter: &WeatherFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Replaces all topology blobs for a country with `blobs`
    /// (delete-then-insert).
    async fn replace_topologies(
        &self,
        country_code: &str,
        blobs: &[TopologyBlob],
    ) -> Result<(), StoreError>;

    /// Returns the topology blob for `(country_code, simplification)`, or
    /// `None` if absent.
    async fn find_topology(
        &self,
        country_code: &str,
        simplification: f64,
    ) -> Result<Option<TopologyBlob>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 2, d, 0, 0, 0).unwrap()
    }

    fn record(origin: &str, destination: &str, date: DateTime<Utc>) -> MobilityRecord {
        MobilityRecord {
            date,
            date_to: date + chrono::Duration::days(7),
            kind: "traffic".to_string(),
            provider: "amadeus".to_string(),
            duration: 7,
            source_file: "f.csv".to_string(),
            origin_country_code: "BRA".to_string(),
            destination_country_code: "BRA".to_string(),
            origin_admin_code: origin.to_string(),
            destination_admin_code: destination.to_string(),
            count: 1,
        }
    }

    #[test]
    fn range_condition_is_inclusive_at_both_ends() {
        let condition = DateCondition::Range {
            start: day(10),
            end: day(20),
        };
        assert!(condition.matches(day(10)));
        assert!(condition.matches(day(20)));
        assert!(condition.matches(day(15)));
        assert!(!condition.matches(day(9)));
        assert!(!condition.matches(day(21)));
    }

    #[test]
    fn at_condition_matches_exact_instant_only() {
        let condition = DateCondition::At(day(10));
        assert!(condition.matches(day(10)));
        assert!(!condition.matches(day(11)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = MobilityFilter::default();
        assert!(filter.matches(&record("br-1", "br-2", day(10))));
    }

    #[test]
    fn filter_applies_all_set_fields() {
        let filter = MobilityFilter {
            origin_admin_code: Some("br-1".to_string()),
            destination_admin_code: Some("br-1".to_string()),
            date: Some(DateCondition::At(day(10))),
            ..MobilityFilter::default()
        };
        assert!(filter.matches(&record("br-1", "br-1", day(10))));
        assert!(!filter.matches(&record("br-1", "br-2", day(10))));
        assert!(!filter.matches(&record("br-1", "br-1", day(11))));
    }
}
