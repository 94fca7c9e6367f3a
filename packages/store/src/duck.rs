//! `DuckDB`-backed [`MobilityStore`] implementation.
//!
//! Stores dates as RFC3339-millis TEXT (`2016-02-28T00:00:00.000Z`) so that
//! lexicographic comparison in SQL equals temporal comparison, and `GeoJSON`
//! features / topology payloads as plain TEXT. The database lives in a
//! single file (default `data/mobility.duckdb`).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use mobility_map_models::{
    Admin, MobilityRecord, TopologyBlob, WeatherMetrics, WeatherRecord, iso_date,
};

use crate::{DateCondition, ImportedFiles, MobilityFilter, MobilityStore, StoreError, WeatherFilter};

/// Document store backed by a `DuckDB` file.
///
/// `duckdb::Connection` is `Send` but not `Sync`, so the connection is
/// wrapped in a `Mutex`; store calls serialize on it.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Opens (or creates) the store at `path` and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        log::debug!("opening store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("SET threads = 4; SET memory_limit = '512MB';")?;
        create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquires the connection.
    ///
    /// # Panics
    ///
    /// Panics if the `Mutex` is poisoned.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("DuckDB store mutex poisoned")
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS admins (
            country_code TEXT NOT NULL,
            admin_code TEXT NOT NULL,
            name TEXT,
            geo_area_sqkm DOUBLE,
            geo_feature TEXT,
            PRIMARY KEY (country_code, admin_code)
        );

        CREATE TABLE IF NOT EXISTS mobility (
            date TEXT NOT NULL,
            date_to TEXT,
            kind TEXT,
            provider TEXT,
            duration INTEGER,
            source_file TEXT,
            origin_country_code TEXT,
            destination_country_code TEXT,
            origin_admin_code TEXT,
            destination_admin_code TEXT,
            count BIGINT
        );

        CREATE TABLE IF NOT EXISTS weather (
            date TEXT NOT NULL,
            kind TEXT,
            country_code TEXT,
            admin_code TEXT,
            temp_mean DOUBLE,
            temp_min DOUBLE,
            temp_max DOUBLE
        );

        CREATE TABLE IF NOT EXISTS topologies (
            country_code TEXT NOT NULL,
            simplification DOUBLE NOT NULL,
            topology TEXT,
            PRIMARY KEY (country_code, simplification)
        );",
    )?;

    Ok(())
}

/// Parses a stored RFC3339 TEXT date back into a UTC timestamp.
fn parse_date(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Conversion {
            message: format!("invalid stored date '{raw}': {e}"),
        })
}

/// Appends the SQL clause and parameters for a date condition.
fn push_date_clause(condition: DateCondition, clauses: &mut Vec<String>, params: &mut Vec<String>) {
    match condition {
        DateCondition::At(at) => {
            clauses.push("date = ?".to_string());
            params.push(iso_date(at));
        }
        DateCondition::Range { start, end } => {
            clauses.push("date >= ?".to_string());
            clauses.push("date <= ?".to_string());
            params.push(iso_date(start));
            params.push(iso_date(end));
        }
    }
}

/// Builds `(where_sql, params)` for a mobility filter.
fn mobility_where(filter: &MobilityFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (column, value) in [
        ("origin_country_code", &filter.origin_country_code),
        ("destination_country_code", &filter.destination_country_code),
        ("origin_admin_code", &filter.origin_admin_code),
        ("destination_admin_code", &filter.destination_admin_code),
    ] {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            params.push(value.clone());
        }
    }
    if let Some(condition) = filter.date {
        push_date_clause(condition, &mut clauses, &mut params);
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

/// Builds `(where_sql, params)` for a weather filter.
fn weather_where(filter: &WeatherFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (column, value) in [
        ("country_code", &filter.country_code),
        ("admin_code", &filter.admin_code),
    ] {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            params.push(value.clone());
        }
    }
    if let Some(condition) = filter.date {
        push_date_clause(condition, &mut clauses, &mut params);
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

#[async_trait]
impl MobilityStore for DuckStore {
    async fn insert_admins(&self, admins: &[Admin]) -> Result<u64, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO admins (country_code, admin_code, name, geo_area_sqkm, geo_feature)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for admin in admins {
            stmt.execute(duckdb::params![
                admin.country_code,
                admin.admin_code,
                admin.name,
                admin.geo_area_sqkm,
                admin.geo_feature.to_string(),
            ])?;
        }
        Ok(admins.len() as u64)
    }

    async fn delete_admins(&self, country_code: &str) -> Result<u64, StoreError> {
        let deleted = self.conn().execute(
            "DELETE FROM admins WHERE country_code = ?",
            duckdb::params![country_code],
        )?;
        Ok(deleted as u64)
    }

    async fn find_admins(&self, country_code: &str) -> Result<Vec<Admin>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT country_code, admin_code, name, geo_area_sqkm, geo_feature
             FROM admins WHERE country_code = ? ORDER BY admin_code",
        )?;
        let rows = stmt.query_map(duckdb::params![country_code], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut admins = Vec::new();
        for row in rows {
            let (country_code, admin_code, name, geo_area_sqkm, feature_raw) = row?;
            let geo_feature =
                serde_json::from_str(&feature_raw).map_err(|e| StoreError::Conversion {
                    message: format!("invalid stored geo_feature for '{admin_code}': {e}"),
                })?;
            admins.push(Admin {
                country_code,
                admin_code,
                name,
                geo_area_sqkm,
                geo_feature,
            });
        }
        Ok(admins)
    }

    async fn insert_mobility(&self, records: &[MobilityRecord]) -> Result<u64, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO mobility (date, date_to, kind, provider, duration, source_file,
                                   origin_country_code, destination_country_code,
                                   origin_admin_code, destination_admin_code, count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for record in records {
            let count = i64::try_from(record.count).map_err(|_| StoreError::Conversion {
                message: format!("mobility count {} out of range", record.count),
            })?;
            stmt.execute(duckdb::params![
                iso_date(record.date),
                iso_date(record.date_to),
                record.kind,
                record.provider,
                record.duration,
                record.source_file,
                record.origin_country_code,
                record.destination_country_code,
                record.origin_admin_code,
                record.destination_admin_code,
                count,
            ])?;
        }
        Ok(records.len() as u64)
    }

    async fn find_mobility(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Vec<MobilityRecord>, StoreError> {
        let (where_sql, params) = mobility_where(filter);
        let sql = format!(
            "SELECT date, date_to, kind, provider, duration, source_file,
                    origin_country_code, destination_country_code,
                    origin_admin_code, destination_admin_code, count
             FROM mobility{where_sql}"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, i64>(10)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (
                date_raw,
                date_to_raw,
                kind,
                provider,
                duration,
                source_file,
                origin_country_code,
                destination_country_code,
                origin_admin_code,
                destination_admin_code,
                count,
            ) = row?;
            records.push(MobilityRecord {
                date: parse_date(&date_raw)?,
                date_to: parse_date(&date_to_raw)?,
                kind,
                provider,
                duration,
                source_file,
                origin_country_code,
                destination_country_code,
                origin_admin_code,
                destination_admin_code,
                count: u64::try_from(count).map_err(|_| StoreError::Conversion {
                    message: format!("negative stored count {count}"),
                })?,
            });
        }
        Ok(records)
    }

    async fn latest_mobility_date(
        &self,
        filter: &MobilityFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (where_sql, params) = mobility_where(filter);
        // MAX over the RFC3339 TEXT column is the temporal maximum.
        let sql = format!("SELECT MAX(date) FROM mobility{where_sql}");

        let conn = self.conn();
        let latest: Option<String> = conn.prepare(&sql)?.query_row(
            duckdb::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        drop(conn);

        latest.as_deref().map(parse_date).transpose()
    }

    async fn count_mobility(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn()
            .prepare("SELECT COUNT(*) FROM mobility")?
            .query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn imported_source_files(&self) -> Result<ImportedFiles, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT kind, source_file FROM mobility")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut index = ImportedFiles::new();
        for row in rows {
            let (kind, source_file) = row?;
            index.entry(kind).or_default().insert(source_file);
        }
        Ok(index)
    }

    async fn insert_weather(&self, records: &[WeatherRecord]) -> Result<u64, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO weather (date, kind, country_code, admin_code,
                                  temp_mean, temp_min, temp_max)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for record in records {
            stmt.execute(duckdb::params![
                iso_date(record.date),
                record.kind,
                record.country_code,
                record.admin_code,
                record.data.temp_mean,
                record.data.temp_min,
                record.data.temp_max,
            ])?;
        }
        Ok(records.len() as u64)
    }

    async fn find_weather(
        &self,
        filter: &WeatherFilter,
    ) -> Result<Vec<WeatherRecord>, StoreError> {
        let (where_sql, params) = weather_where(filter);
        let sql = format!(
            "SELECT date, kind, country_code, admin_code, temp_mean, temp_min, temp_max
             FROM weather{where_sql}"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (date_raw, kind, country_code, admin_code, temp_mean, temp_min, temp_max) = row?;
            records.push(WeatherRecord {
                date: parse_date(&date_raw)?,
                kind,
                country_code,
                admin_code,
                data: WeatherMetrics {
                    temp_mean,
                    temp_min,
                    temp_max,
                },
            });
        }
        Ok(records)
    }

    async fn latest_weather_date(
        &self,
        filter: &WeatherFilter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (where_sql, params) = weather_where(filter);
        let sql = format!("SELECT MAX(date) FROM weather{where_sql}");

        let conn = self.conn();
        let latest: Option<String> = conn.prepare(&sql)?.query_row(
            duckdb::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        drop(conn);

        latest.as_deref().map(parse_date).transpose()
    }

    async fn replace_topologies(
        &self,
        country_code: &str,
        blobs: &[TopologyBlob],
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM topologies WHERE country_code = ?",
            duckdb::params![country_code],
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO topologies (country_code, simplification, topology) VALUES (?, ?, ?)",
        )?;
        for blob in blobs {
            stmt.execute(duckdb::params![
                blob.country_code,
                blob.simplification,
                blob.topology.to_string(),
            ])?;
        }
        Ok(())
    }

    async fn find_topology(
        &self,
        country_code: &str,
        simplification: f64,
    ) -> Result<Option<TopologyBlob>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT country_code, simplification, topology FROM topologies
             WHERE country_code = ? AND simplification = ?",
        )?;
        let mut rows = stmt.query_map(duckdb::params![country_code, simplification], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (country_code, simplification, topology_raw) = row?;
        let topology =
            serde_json::from_str(&topology_raw).map_err(|e| StoreError::Conversion {
                message: format!("invalid stored topology for '{country_code}': {e}"),
            })?;
        Ok(Some(TopologyBlob {
            country_code,
            simplification,
            topology,
        }))
    }
}
