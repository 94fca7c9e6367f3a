//! HTTP handler functions for the mobility map API.

use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use mobility_map_aggregate::AggregateError;
use serde::Deserialize;

use crate::AppState;

/// Optional `start`/`end` bounds shared by range queries.
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

/// `GET /api/weather/country/{country}` parameters.
#[derive(Debug, Deserialize)]
pub struct DateParams {
    date: Option<String>,
}

/// `GET /api/departures` parameters.
#[derive(Debug, Deserialize)]
pub struct DeparturesParams {
    start: String,
    end: String,
    country: Option<String>,
}

/// `GET /api/topology/{country}` parameters.
#[derive(Debug, Deserialize)]
pub struct TopologyParams {
    simplification: Option<f64>,
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /api/admins/{country}`
///
/// Lists the admin entities of a country.
pub async fn admins(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.aggregator.admins(&path).await {
        Ok(admins) => HttpResponse::Ok().json(admins),
        Err(e) => error_response("Failed to query admins", &e),
    }
}

/// `GET /api/populations/{country}?start&end`
///
/// Population estimates per admin over time.
pub async fn populations(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<RangeParams>,
) -> HttpResponse {
    let (start, end) = match parse_range(&params) {
        Ok(bounds) => bounds,
        Err(response) => return response,
    };

    match state.aggregator.admin_populations(&path, start, end).await {
        Ok(series) => HttpResponse::Ok().json(series),
        Err(e) => error_response("Failed to query populations", &e),
    }
}

/// `GET /api/egress/{admin}?start&end`
///
/// Outbound movement counts from one origin admin, keyed by destination.
pub async fn egress(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<RangeParams>,
) -> HttpResponse {
    let (start, end) = match parse_range(&params) {
        Ok(bounds) => bounds,
        Err(response) => return response,
    };

    match state.aggregator.egress_mobility(&path, start, end).await {
        Ok(series) => HttpResponse::Ok().json(series),
        Err(e) => error_response("Failed to query egress mobility", &e),
    }
}

/// `GET /api/weather/country/{country}?date`
///
/// Weather for every admin of a country on one date (latest when omitted).
pub async fn country_weather(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<DateParams>,
) -> HttpResponse {
    let date = match parse_optional_timestamp(params.date.as_deref(), "date") {
        Ok(date) => date,
        Err(response) => return response,
    };

    match state.aggregator.country_weather(&path, date).await {
        Ok(series) => HttpResponse::Ok().json(series),
        Err(e) => error_response("Failed to query weather", &e),
    }
}

/// `GET /api/weather/admin/{admin}?start&end`
///
/// Weather observations for one admin over time.
pub async fn admin_weather(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<RangeParams>,
) -> HttpResponse {
    let (start, end) = match parse_range(&params) {
        Ok(bounds) => bounds,
        Err(response) => return response,
    };

    match state.aggregator.admin_weather(&path, start, end).await {
        Ok(series) => HttpResponse::Ok().json(series),
        Err(e) => error_response("Failed to query weather", &e),
    }
}

/// `GET /api/departures?start&end&country`
///
/// Total departures per origin country within the range.
pub async fn departures(
    state: web::Data<AppState>,
    params: web::Query<DeparturesParams>,
) -> HttpResponse {
    let Some(start) = parse_timestamp(&params.start) else {
        return bad_request("invalid 'start' timestamp");
    };
    let Some(end) = parse_timestamp(&params.end) else {
        return bad_request("invalid 'end' timestamp");
    };

    match state
        .aggregator
        .departures(start, end, params.country.as_deref())
        .await
    {
        Ok(departures) => HttpResponse::Ok().json(departures),
        Err(e) => error_response("Failed to query departures", &e),
    }
}

/// `GET /api/topology/{country}?simplification`
///
/// The stored boundary topology for a country (full fidelity by default).
pub async fn topology(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<TopologyParams>,
) -> HttpResponse {
    let simplification = params.simplification.unwrap_or(1.0);

    match state.aggregator.topology(&path, simplification).await {
        Ok(Some(blob)) => HttpResponse::Ok().json(blob.topology),
        Ok(None) => HttpResponse::Ok().json(serde_json::Value::Null),
        Err(e) => error_response("Failed to query topology", &e),
    }
}

/// Maps an aggregation failure onto an HTTP response: bad bounds are the
/// caller's fault, everything else is a 500.
fn error_response(context: &str, error: &AggregateError) -> HttpResponse {
    match error {
        AggregateError::EndWithoutStart => bad_request("an end date requires a start date"),
        AggregateError::Store(e) => {
            log::error!("{context}: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": context }))
        }
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

fn parse_range(
    params: &RangeParams,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), HttpResponse> {
    let start = parse_optional_timestamp(params.start.as_deref(), "start")?;
    let end = parse_optional_timestamp(params.end.as_deref(), "end")?;
    Ok((start, end))
}

fn parse_optional_timestamp(
    raw: Option<&str>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, HttpResponse> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw).map(Some).ok_or_else(|| {
            bad_request(&format!("invalid '{name}' timestamp"))
        }),
    }
}

/// Parses an RFC3339 timestamp or bare `YYYY-MM-DD` date (midnight UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
