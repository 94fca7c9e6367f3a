//! Population and egress aggregations over mobility records.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use mobility_map_models::{Admin, iso_date};
use mobility_map_store::{DateCondition, MobilityFilter, StoreError};

use crate::temporal::resolve_date_condition;
use crate::{AggregateError, Aggregator, DateSeries};

impl Aggregator {
    /// Population estimates per admin of a country over time.
    ///
    /// A self-referencing mobility record (origin admin == destination
    /// admin) is the population proxy for that admin on that date. The
    /// latest-date fallback is resolved once across the whole country, so
    /// the no-bounds mode returns data for exactly one date even when the
    /// admins' newest records differ. Per-admin record queries fan out
    /// concurrently against the resolved condition and are all joined
    /// before returning.
    ///
    /// Unknown countries and dates without data yield an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure or an end-only query.
    pub async fn admin_populations(
        &self,
        country_code: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DateSeries<u64>, AggregateError> {
        let admins = self.store().find_admins(country_code).await?;
        log::debug!(
            "aggregating populations for {country_code} across {} admins",
            admins.len()
        );

        let condition =
            resolve_date_condition(start, end, || self.latest_population_date(&admins)).await?;
        let Some(condition) = condition else {
            return Ok(DateSeries::new());
        };

        let lookups = admins
            .iter()
            .map(|admin| self.admin_population_series(&admin.admin_code, condition));
        let per_admin = try_join_all(lookups).await?;

        let mut series = DateSeries::new();
        for points in per_admin {
            for (date, admin_code, count) in points {
                series.entry(date).or_default().insert(admin_code, count);
            }
        }
        Ok(series)
    }

    /// The newest self-mobility date across all of a country's admins.
    async fn latest_population_date(
        &self,
        admins: &[Admin],
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let lookups = admins.iter().map(|admin| async move {
            let scope = self_scope(&admin.admin_code);
            self.store().latest_mobility_date(&scope).await
        });
        let dates = try_join_all(lookups).await?;
        Ok(dates.into_iter().flatten().max())
    }

    /// Self-mobility counts for one admin on the resolved dates:
    /// `(date_iso, admin_code, count)`.
    async fn admin_population_series(
        &self,
        admin_code: &str,
        condition: DateCondition,
    ) -> Result<Vec<(String, String, u64)>, AggregateError> {
        let filter = MobilityFilter {
            date: Some(condition),
            ..self_scope(admin_code)
        };
        let records = self.store().find_mobility(&filter).await?;
        Ok(records
            .into_iter()
            .map(|r| (iso_date(r.date), r.origin_admin_code, r.count))
            .collect())
    }

    /// Outbound movement counts from one origin admin over time, keyed by
    /// destination admin.
    ///
    /// Dates without data are absent; an unknown origin yields an empty
    /// mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure or an end-only query.
    pub async fn egress_mobility(
        &self,
        origin_admin_code: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DateSeries<u64>, AggregateError> {
        let scope = MobilityFilter {
            origin_admin_code: Some(origin_admin_code.to_string()),
            ..MobilityFilter::default()
        };

        let condition = resolve_date_condition(start, end, || async {
            self.store().latest_mobility_date(&scope).await
        })
        .await?;
        let Some(condition) = condition else {
            return Ok(DateSeries::new());
        };

        let filter = MobilityFilter {
            date: Some(condition),
            ..scope.clone()
        };
        let records = self.store().find_mobility(&filter).await?;

        let mut series = DateSeries::new();
        for record in records {
            let per_date = series.entry(iso_date(record.date)).or_default();
            *per_date.entry(record.destination_admin_code).or_insert(0) += record.count;
        }
        Ok(series)
    }
}

/// Scope filter for an admin's self-referencing records.
fn self_scope(admin_code: &str) -> MobilityFilter {
    MobilityFilter {
        origin_admin_code: Some(admin_code.to_string()),
        destination_admin_code: Some(admin_code.to_string()),
        ..MobilityFilter::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone as _;
    use mobility_map_models::{Admin, MobilityRecord};
    use mobility_map_store::MobilityStore;
    use mobility_map_store::memory::MemoryStore;

    use super::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 2, d, 0, 0, 0).unwrap()
    }

    fn admin(code: &str) -> Admin {
        Admin {
            country_code: "br".to_string(),
            admin_code: code.to_string(),
            name: code.to_string(),
            geo_area_sqkm: 1.0,
            geo_feature: serde_json::Value::Null,
        }
    }

    fn movement(origin: &str, destination: &str, date: DateTime<Utc>, count: u64) -> MobilityRecord {
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
            count,
        }
    }

    async fn brazil_fixture() -> Aggregator {
        let store = MemoryStore::new();
        store
            .insert_admins(&[admin("br-1"), admin("br-2"), admin("br-3")])
            .await
            .unwrap();
        store
            .insert_mobility(&[
                movement("br-1", "br-1", day(28), 100),
                movement("br-2", "br-2", day(28), 200),
                movement("br-1", "br-1", day(29), 1000),
                movement("br-2", "br-2", day(29), 2000),
                movement("br-3", "br-3", day(29), 3000),
            ])
            .await
            .unwrap();
        Aggregator::new(Arc::new(store))
    }

    #[tokio::test]
    async fn populations_for_exact_date() {
        let aggregator = brazil_fixture().await;
        let series = aggregator
            .admin_populations("br", Some(day(28)), None)
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        let per_admin = &series["2016-02-28T00:00:00.000Z"];
        assert_eq!(per_admin.len(), 2);
        assert_eq!(per_admin["br-1"], 100);
        assert_eq!(per_admin["br-2"], 200);
    }

    #[tokio::test]
    async fn populations_without_bounds_return_latest_only() {
        let aggregator = brazil_fixture().await;
        let series = aggregator.admin_populations("br", None, None).await.unwrap();

        assert_eq!(series.len(), 1);
        let per_admin = &series["2016-02-29T00:00:00.000Z"];
        assert_eq!(per_admin["br-1"], 1000);
        assert_eq!(per_admin["br-2"], 2000);
        assert_eq!(per_admin["br-3"], 3000);
    }

    #[tokio::test]
    async fn latest_mode_resolves_one_date_across_the_country() {
        let store = MemoryStore::new();
        store
            .insert_admins(&[admin("br-1"), admin("br-3")])
            .await
            .unwrap();
        store
            .insert_mobility(&[
                movement("br-1", "br-1", day(28), 100),
                movement("br-1", "br-1", day(29), 1000),
                // br-3's newest self record is older than br-1's.
                movement("br-3", "br-3", day(20), 77),
            ])
            .await
            .unwrap();
        let aggregator = Aggregator::new(Arc::new(store));

        let series = aggregator.admin_populations("br", None, None).await.unwrap();
        assert_eq!(
            series.keys().collect::<Vec<_>>(),
            vec!["2016-02-29T00:00:00.000Z"]
        );
        let per_admin = &series["2016-02-29T00:00:00.000Z"];
        assert_eq!(per_admin["br-1"], 1000);
        assert!(!per_admin.contains_key("br-3"));
    }

    #[tokio::test]
    async fn populations_over_range_include_both_endpoints() {
        let aggregator = brazil_fixture().await;
        let series = aggregator
            .admin_populations("br", Some(day(28)), Some(day(29)))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn unknown_country_yields_empty_mapping() {
        let aggregator = brazil_fixture().await;
        let series = aggregator.admin_populations("xx", None, None).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn empty_store_yields_empty_mapping() {
        let store = MemoryStore::new();
        store.insert_admins(&[admin("br-1")]).await.unwrap();
        let aggregator = Aggregator::new(Arc::new(store));

        let series = aggregator.admin_populations("br", None, None).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn egress_keyed_by_destination() {
        let store = MemoryStore::new();
        store
            .insert_mobility(&[
                movement("br-1", "br-2", day(28), 40),
                movement("br-1", "br-3", day(28), 60),
                movement("br-2", "br-1", day(28), 999),
            ])
            .await
            .unwrap();
        let aggregator = Aggregator::new(Arc::new(store));

        let series = aggregator
            .egress_mobility("br-1", Some(day(28)), None)
            .await
            .unwrap();
        let per_destination = &series["2016-02-28T00:00:00.000Z"];
        assert_eq!(per_destination.len(), 2);
        assert_eq!(per_destination["br-2"], 40);
        assert_eq!(per_destination["br-3"], 60);
    }

    #[tokio::test]
    async fn egress_without_bounds_uses_latest_for_that_origin() {
        let store = MemoryStore::new();
        store
            .insert_mobility(&[
                movement("br-1", "br-2", day(28), 40),
                movement("br-1", "br-2", day(29), 50),
                // A later date for a different origin must not leak in.
                movement("br-9", "br-2", day(20), 7),
            ])
            .await
            .unwrap();
        let aggregator = Aggregator::new(Arc::new(store));

        let series = aggregator.egress_mobility("br-1", None, None).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series["2016-02-29T00:00:00.000Z"]["br-2"], 50);
    }

    #[tokio::test]
    async fn end_without_start_is_an_error() {
        let aggregator = brazil_fixture().await;
        let result = aggregator.admin_populations("br", None, Some(day(29))).await;
        assert!(matches!(result, Err(AggregateError::EndWithoutStart)));
    }
}
