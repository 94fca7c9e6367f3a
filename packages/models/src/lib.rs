#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Shared domain types for the mobility map.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the document store: administrative regions, mobility movement records,
//! weather observations, and serialized boundary topologies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Formats a timestamp as the canonical ISO-8601 UTC date key with
/// millisecond precision, e.g. `2016-02-28T00:00:00.000Z`.
///
/// Every sparse-mapping key in the aggregation layer uses this exact format,
/// and the store persists dates in it too, so that lexicographic comparison
/// of stored values equals temporal comparison.
#[must_use]
pub fn iso_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An administrative region, identified by a code unique within its country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    /// ISO 3166-1 alpha-2 two-letter country code, lowercase.
    pub country_code: String,
    /// Identifier unique within the country, prefixed with the country code
    /// (e.g. `br_1_5_gadm2-8`).
    pub admin_code: String,
    /// Human-readable name, like "São Bernardo do Campo".
    pub name: String,
    /// Area in square kilometers.
    pub geo_area_sqkm: f64,
    /// The region's `GeoJSON` feature (geometry plus properties).
    pub geo_feature: serde_json::Value,
}

/// A movement count from one admin to another on a given date.
///
/// A self-referencing record (origin admin == destination admin) is the
/// population proxy for that admin on that date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobilityRecord {
    /// Which date this data is for. There is no explicit granularity field;
    /// `kind` distinguishes e.g. daily from weekly data.
    pub date: DateTime<Utc>,
    /// End of the window this record covers (exclusive).
    pub date_to: DateTime<Utc>,
    /// Data subtype / source collection (e.g. "traffic", "midt").
    pub kind: String,
    /// Upstream data provider.
    pub provider: String,
    /// Window length in days.
    pub duration: u32,
    /// Name of the source file this record was imported from. Grouping on
    /// this field yields the importer's dedup index.
    pub source_file: String,
    /// Origin country code as supplied by the provider (upper-case alpha-3).
    pub origin_country_code: String,
    /// Destination country code as supplied by the provider.
    pub destination_country_code: String,
    /// Movement origin. Matches an [`Admin::admin_code`].
    pub origin_admin_code: String,
    /// Movement destination. Matches an [`Admin::admin_code`].
    pub destination_admin_code: String,
    /// Number of movements. Non-negative.
    pub count: u64,
}

/// Mean, min, and max temperature in degrees centigrade.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherMetrics {
    /// Mean temperature.
    pub temp_mean: f64,
    /// Minimum temperature.
    pub temp_min: f64,
    /// Maximum temperature.
    pub temp_max: f64,
}

/// A weather observation for one admin on one date.
///
/// One record per admin per date-granularity `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Which date this data is for.
    pub date: DateTime<Utc>,
    /// Data subtype (e.g. "daily"/"hourly").
    pub kind: String,
    /// ISO 3166-1 alpha-2 two-letter country code, lowercase.
    pub country_code: String,
    /// Matches an [`Admin::admin_code`].
    pub admin_code: String,
    /// Temperature metrics.
    pub data: WeatherMetrics,
}

/// A serialized boundary topology for one country at one simplification
/// level.
///
/// Immutable reference data, regenerated wholesale by admin import jobs and
/// keyed uniquely by `(country_code, simplification)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyBlob {
    /// ISO 3166-1 alpha-2 two-letter country code, lowercase.
    pub country_code: String,
    /// Simplification level: `1.0` is the full-fidelity geometry, lower
    /// values are progressively simplified.
    pub simplification: f64,
    /// The serialized topology object.
    pub topology: serde_json::Value,
}

/// Aggregated departure activity for one origin country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryDepartures {
    /// Origin country code, mapped to a two-letter display code where a
    /// mapping exists.
    pub origin_country_code: String,
    /// Sum of movement counts originating in the country.
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn iso_date_has_millis_and_z_suffix() {
        let date = Utc.with_ymd_and_hms(2016, 2, 28, 0, 0, 0).unwrap();
        assert_eq!(iso_date(date), "2016-02-28T00:00:00.000Z");
    }

    #[test]
    fn iso_date_orders_lexicographically() {
        let a = Utc.with_ymd_and_hms(2016, 2, 28, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2016, 2, 29, 0, 0, 0).unwrap();
        assert!(iso_date(a) < iso_date(b));
    }
}
