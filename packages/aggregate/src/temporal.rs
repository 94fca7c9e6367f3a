//! Temporal query resolution.
//!
//! Query operations accept an optional `start` and `end`. The resolver maps
//! the four combinations onto a [`DateCondition`] for the store, falling
//! back to a latest-available lookup when neither bound is given.

use chrono::{DateTime, Utc};
use mobility_map_store::{DateCondition, StoreError};

use crate::AggregateError;

/// Resolves optional query bounds into a store date condition.
///
/// - Both bounds → inclusive [`DateCondition::Range`].
/// - Only `start` → exact [`DateCondition::At`].
/// - Neither → `latest` is invoked (the store's max-date lookup for the
///   query's scope); `Ok(None)` means the scope holds no data at all, which
///   callers map to an empty result.
/// - Only `end` → [`AggregateError::EndWithoutStart`].
///
/// # Errors
///
/// Returns [`AggregateError::EndWithoutStart`] for an end-only query, or a
/// store error from the latest-date lookup.
pub async fn resolve_date_condition<F, Fut>(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    latest: F,
) -> Result<Option<DateCondition>, AggregateError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<DateTime<Utc>>, StoreError>>,
{
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(DateCondition::Range { start, end })),
        (Some(start), None) => Ok(Some(DateCondition::At(start))),
        (None, Some(_)) => Err(AggregateError::EndWithoutStart),
        (None, None) => Ok(latest().await?.map(DateCondition::At)),
    }
}
