//! Travel activity: country-level departure totals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mobility_map_models::CountryDepartures;
use mobility_map_store::{DateCondition, MobilityFilter};

use crate::country_codes::display_code;
use crate::{AggregateError, Aggregator};

impl Aggregator {
    /// Total departures per origin country within `[start, end]`
    /// (inclusive), optionally restricted to one origin country.
    ///
    /// The origin filter is upper-cased before matching since stored
    /// provider codes are upper-case alpha-3. Output codes are mapped to
    /// lowercase alpha-2 where a mapping exists and sorted by mapped code.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure.
    pub async fn departures(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        origin_country: Option<&str>,
    ) -> Result<Vec<CountryDepartures>, AggregateError> {
        let filter = MobilityFilter {
            origin_country_code: origin_country.map(str::to_uppercase),
            date: Some(DateCondition::Range { start, end }),
            ..MobilityFilter::default()
        };
        let records = self.store().find_mobility(&filter).await?;

        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for record in records {
            *totals
                .entry(display_code(&record.origin_country_code))
                .or_insert(0) += record.count;
        }

        Ok(totals
            .into_iter()
            .map(|(origin_country_code, count)| CountryDepartures {
                origin_country_code,
                count,
            })
            .collect())
    }
}
