//! In-memory [`MobilityStore`] implementation.
//!
//! Backs tests across the workspace; everything lives in a single
//! `RwLock`-protected struct. Semantics mirror [`crate::duck::DuckStore`]
//! exactly (same filter matching, same latest-date behavior).

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mobility_map_models::{Admin, MobilityRecord, TopologyBlob, WeatherRecord};

use crate::{ImportedFiles, MobilityFilter, MobilityStore, StoreError, WeatherFilter};

#[derive(Default)]
struct Inner {
    admins: Vec<Admin>,
    mobility: Vec<MobilityRecord>,
    weather: Vec<WeatherRecord>,
    topologies: Vec<TopologyBlob>,
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("memory store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl MobilityStore for MemoryStore {
    async fn insert_admins(&self, admins: &[Admin]) -> Result<u64, StoreError> {
        self.write().admins.extend_from_slice(admins);
        Ok(admins.len() as u64)
    }

    async fn delete_admins(&self, country_code: &str) -> Result<u64, StoreError> {
        let mut inner = self.write();
        let before = inner.admins.len();
        inner.admins.retain(|a| a.country_code != country_code);
        Ok((before - inner.admins.len()) as u64)
    }

    async fn find_admins(&self, country_code: &str) -> Result<Vec<Admin>, StoreError> {
        let mut admins: Vec<Admin> = self
            .read()
            .admins
            .iter()
            .filter(|a| a.country_code == country_code)
            .cloned()
            .collect();
        admins.sort_by(|a, b| a.admin_code.cmp(&b.admin_code));
        Ok(admins)
    }

    async fn insert_mobility(&self, records: &[MobilityRecord]) -> Result<u64, StoreError> {
        self.write().mobility.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn find_mobility(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Vec<MobilityRecord>, StoreError> {
        Ok(self
            .read()
            .mobility
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn latest_mobility_date(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read()
            .mobility
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.date)
            .max())
    }

    async fn count_mobility(&self) -> Result<u64, StoreError> {
        Ok(self.read().mobility.len() as u64)
    }

    async fn imported_source_files(&self) -> Result<ImportedFiles, StoreError> {
        let mut index = ImportedFiles::new();
        for record in &self.read().mobility {
            index
                .entry(record.kind.clone())
                .or_default()
                .insert(record.source_file.clone());
        }
        Ok(index)
    }

    async fn insert_weather(&self, records: &[WeatherRecord]) -> Result<u64, StoreError> {
        self.write().weather.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn find_weather(
        &self,
        filter: &WeatherFilter,
    ) -> Result<Vec<WeatherRecord>, StoreError> {
        Ok(self
            .read()
            .weather
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn latest_weather_date(
        &self,
        filter: &WeatherFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read()
            .weather
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.date)
            .max())
    }

    async fn replace_topologies(
        &self,
        country_code: &str,
        blobs: &[TopologyBlob],
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        inner.topologies.retain(|t| t.country_code != country_code);
        inner.topologies.extend_from_slice(blobs);
        Ok(())
    }

    async fn find_topology(
        &self,
        country_code: &str,
        simplification: f64,
    ) -> Result<Option<TopologyBlob>, StoreError> {
        Ok(self
            .read()
            .topologies
            .iter()
            .find(|t| {
                t.country_code == country_code
                    && (t.simplification - simplification).abs() < f64::EPSILON
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DateCondition;
    use chrono::TimeZone as _;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 2, d, 0, 0, 0).unwrap()
    }

    fn record(source_file: &str, kind: &str, date: DateTime<Utc>) -> MobilityRecord {
        MobilityRecord {
            date,
            date_to: date + chrono::Duration::days(7),
            kind: kind.to_string(),
            provider: "amadeus".to_string(),
            duration: 7,
            source_file: source_file.to_string(),
            origin_country_code: "BRA".to_string(),
            destination_country_code: "BRA".to_string(),
            origin_admin_code: "br-1".to_string(),
            destination_admin_code: "br-1".to_string(),
            count: 10,
        }
    }

    #[tokio::test]
    async fn latest_date_ignores_non_matching_records() {
        let store = MemoryStore::new();
        store
            .insert_mobility(&[record("a.csv", "traffic", day(10)), {
                let mut other = record("b.csv", "traffic", day(20));
                other.origin_admin_code = "br-2".to_string();
                other
            }])
            .await
            .unwrap();

        let filter = MobilityFilter {
            origin_admin_code: Some("br-1".to_string()),
            ..MobilityFilter::default()
        };
        assert_eq!(
            store.latest_mobility_date(&filter).await.unwrap(),
            Some(day(10))
        );
    }

    #[tokio::test]
    async fn latest_date_is_none_on_empty_store() {
        let store = MemoryStore::new();
        let latest = store
            .latest_mobility_date(&MobilityFilter::default())
            .await
            .unwrap();
        assert_eq!(latest, None);
    }

    #[tokio::test]
    async fn imported_source_files_groups_by_kind() {
        let store = MemoryStore::new();
        store
            .insert_mobility(&[
                record("a.csv", "traffic", day(10)),
                record("a.csv", "traffic", day(11)),
                record("b.csv", "traffic", day(10)),
                record("c.csv", "midt", day(10)),
            ])
            .await
            .unwrap();

        let index = store.imported_source_files().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index["traffic"].len(), 2);
        assert!(index["traffic"].contains("a.csv"));
        assert!(index["traffic"].contains("b.csv"));
        assert!(index["midt"].contains("c.csv"));
    }

    #[tokio::test]
    async fn delete_admins_only_touches_one_country() {
        let store = MemoryStore::new();
        let admin = |country: &str, code: &str| Admin {
            country_code: country.to_string(),
            admin_code: code.to_string(),
            name: code.to_string(),
            geo_area_sqkm: 1.0,
            geo_feature: serde_json::Value::Null,
        };
        store
            .insert_admins(&[admin("br", "br-1"), admin("br", "br-2"), admin("co", "co-1")])
            .await
            .unwrap();

        assert_eq!(store.delete_admins("br").await.unwrap(), 2);
        assert_eq!(store.find_admins("br").await.unwrap().len(), 0);
        assert_eq!(store.find_admins("co").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_topologies_is_wholesale_per_country() {
        let store = MemoryStore::new();
        let blob = |country: &str, level: f64| TopologyBlob {
            country_code: country.to_string(),
            simplification: level,
            topology: serde_json::json!({"type": "Topology"}),
        };
        store
            .replace_topologies("br", &[blob("br", 1.0), blob("br", 0.4)])
            .await
            .unwrap();
        store
            .replace_topologies("br", &[blob("br", 1.0)])
            .await
            .unwrap();

        assert!(store.find_topology("br", 1.0).await.unwrap().is_some());
        assert!(store.find_topology("br", 0.4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_with_date_range_is_inclusive() {
        let store = MemoryStore::new();
        store
            .insert_mobility(&[
                record("a.csv", "traffic", day(10)),
                record("a.csv", "traffic", day(12)),
                record("a.csv", "traffic", day(14)),
            ])
            .await
            .unwrap();

        let filter = MobilityFilter {
            date: Some(DateCondition::Range {
                start: day(10),
                end: day(12),
            }),
            ..MobilityFilter::default()
        };
        assert_eq!(store.find_mobility(&filter).await.unwrap().len(), 2);
    }
}
