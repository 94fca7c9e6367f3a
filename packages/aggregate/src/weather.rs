//! Weather aggregations.

use chrono::{DateTime, Utc};
use mobility_map_models::{WeatherMetrics, iso_date};
use mobility_map_store::WeatherFilter;

use crate::temporal::resolve_date_condition;
use crate::{AggregateError, Aggregator, DateSeries};

impl Aggregator {
    /// Weather observations for every admin of a country on the requested
    /// date, or the country's latest available date when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure.
    pub async fn country_weather(
        &self,
        country_code: &str,
        date: Option<DateTime<Utc>>,
    ) -> Result<DateSeries<WeatherMetrics>, AggregateError> {
        let scope = WeatherFilter {
            country_code: Some(country_code.to_string()),
            ..WeatherFilter::default()
        };
        self.weather_series(scope, date, None).await
    }

    /// Weather observations for one admin over a range, an exact date, or
    /// the admin's latest available date.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure or an end-only query.
    pub async fn admin_weather(
        &self,
        admin_code: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DateSeries<WeatherMetrics>, AggregateError> {
        let scope = WeatherFilter {
            admin_code: Some(admin_code.to_string()),
            ..WeatherFilter::default()
        };
        self.weather_series(scope, start, end).await
    }

    async fn weather_series(
        &self,
        scope: WeatherFilter,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DateSeries<WeatherMetrics>, AggregateError> {
        let condition = resolve_date_condition(start, end, || async {
            self.store().latest_weather_date(&scope).await
        })
        .await?;
        let Some(condition) = condition else {
            return Ok(DateSeries::new());
        };

        let filter = WeatherFilter {
            date: Some(condition),
            ..scope.clone()
        };
        let records = self.store().find_weather(&filter).await?;

        let mut series = DateSeries::new();
        for record in records {
            series
                .entry(iso_date(record.date))
                .or_default()
                .insert(record.admin_code, record.data);
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone as _;
    use mobility_map_models::WeatherRecord;
    use mobility_map_store::MobilityStore;
    use mobility_map_store::memory::MemoryStore;

    use super::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 2, d, 0, 0, 0).unwrap()
    }

    fn observation(d: u32, country: &str, admin: &str, mean: f64) -> WeatherRecord {
        WeatherRecord {
            date: day(d),
            kind: "daily".to_string(),
            country_code: country.to_string(),
            admin_code: admin.to_string(),
            data: WeatherMetrics {
                temp_mean: mean,
                temp_min: mean - 5.0,
                temp_max: mean + 5.0,
            },
        }
    }

    async fn fixture() -> Aggregator {
        let store = MemoryStore::new();
        store
            .insert_weather(&[
                observation(28, "br", "br-1", 21.0),
                observation(28, "br", "br-2", 24.0),
                observation(29, "br", "br-1", 30.0),
                observation(29, "co", "co-1", 18.0),
            ])
            .await
            .unwrap();
        Aggregator::new(Arc::new(store))
    }

    #[tokio::test]
    async fn country_weather_for_exact_date() {
        let aggregator = fixture().await;
        let series = aggregator
            .country_weather("br", Some(day(28)))
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        let per_admin = &series["2016-02-28T00:00:00.000Z"];
        assert_eq!(per_admin.len(), 2);
        assert!((per_admin["br-1"].temp_mean - 21.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn country_weather_defaults_to_latest_within_country() {
        let aggregator = fixture().await;
        let series = aggregator.country_weather("br", None).await.unwrap();

        assert_eq!(series.len(), 1);
        let per_admin = &series["2016-02-29T00:00:00.000Z"];
        assert_eq!(per_admin.len(), 1);
        assert!((per_admin["br-1"].temp_mean - 30.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn admin_weather_over_range() {
        let aggregator = fixture().await;
        let series = aggregator
            .admin_weather("br-1", Some(day(28)), Some(day(29)))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn unknown_scope_yields_empty_mapping() {
        let aggregator = fixture().await;
        assert!(aggregator.country_weather("xx", None).await.unwrap().is_empty());
        assert!(
            aggregator
                .admin_weather("xx-1", None, None)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
