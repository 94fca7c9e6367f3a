#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Actix-Web API server for the mobility map.
//!
//! Serves the aggregation queries (populations, egress mobility, weather,
//! departures) plus admin entities and boundary topologies over a thin
//! JSON REST surface. All query work happens in the aggregation layer;
//! handlers only parse parameters and shape responses.

mod handlers;

use std::path::Path;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use mobility_map_aggregate::Aggregator;
use mobility_map_store::duck::DuckStore;

/// Default `DuckDB` file path when `MOBILITY_MAP_DB` is unset.
pub const DEFAULT_DB_PATH: &str = "data/mobility.duckdb";

/// Shared application state.
pub struct AppState {
    /// Aggregation engine over the document store.
    pub aggregator: Aggregator,
}

/// Starts the mobility map API server.
///
/// Opens the `DuckDB` store (`MOBILITY_MAP_DB`, default
/// [`DEFAULT_DB_PATH`]), builds the aggregation engine, and serves the API
/// on `BIND_ADDR`:`PORT` (default `127.0.0.1:8080`). This is a regular
/// async function — the caller provides the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the store cannot be opened.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    let db_path =
        std::env::var("MOBILITY_MAP_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    log::info!("Opening store at {db_path}...");
    let store = DuckStore::open(Path::new(&db_path)).expect("Failed to open mobility store");
    let aggregator = Aggregator::new(Arc::new(store));

    let state = web::Data::new(AppState { aggregator });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/admins/{country}", web::get().to(handlers::admins))
                    .route(
                        "/populations/{country}",
                        web::get().to(handlers::populations),
                    )
                    .route("/egress/{admin}", web::get().to(handlers::egress))
                    .route(
                        "/weather/country/{country}",
                        web::get().to(handlers::country_weather),
                    )
                    .route(
                        "/weather/admin/{admin}",
                        web::get().to(handlers::admin_weather),
                    )
                    .route("/departures", web::get().to(handlers::departures))
                    .route("/topology/{country}", web::get().to(handlers::topology)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
