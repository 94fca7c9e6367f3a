#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aggregation engine for the mobility map.
//!
//! Every query operation follows the same shape: look up the entity set for
//! the scope, resolve the temporal condition (explicit range, exact date, or
//! latest-available), query raw records, and assemble a sparse
//! `date -> code -> value` mapping. Absence of data is always an empty
//! mapping, never an error.

pub mod activity;
pub mod country_codes;
pub mod mobility;
pub mod temporal;
pub mod weather;

use std::collections::BTreeMap;
use std::sync::Arc;

use mobility_map_store::{MobilityStore, StoreError};

/// Errors that can occur during aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// An end date was supplied without a start date.
    #[error("An end date requires a start date")]
    EndWithoutStart,

    /// Store query failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sparse time-series mapping: ISO-8601 date key to per-code values. Dates
/// with no data are absent entirely.
pub type DateSeries<T> = BTreeMap<String, BTreeMap<String, T>>;

/// Read-side aggregation over a [`MobilityStore`].
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn MobilityStore>,
}

impl Aggregator {
    /// Creates an aggregator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MobilityStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MobilityStore> {
        &self.store
    }

    /// The admin entities of a country, ordered by admin code. Unknown
    /// countries yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure.
    pub async fn admins(
        &self,
        country_code: &str,
    ) -> Result<Vec<mobility_map_models::Admin>, AggregateError> {
        Ok(self.store.find_admins(country_code).await?)
    }

    /// The stored boundary topology for a country at one simplification
    /// level, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] on store failure.
    pub async fn topology(
        &self,
        country_code: &str,
        simplification: f64,
    ) -> Result<Option<mobility_map_models::TopologyBlob>, AggregateError> {
        Ok(self.store.find_topology(country_code, simplification).await?)
    }
}
