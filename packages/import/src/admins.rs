//! Admin boundary import from `GeoJSON`.
//!
//! Replaces a country's admin entities wholesale and regenerates its stored
//! boundary topologies at two simplification levels: `1.0` (verbatim
//! geometry) and `0.4` (Douglas-Peucker simplified).

use std::path::Path;

use geo::{ChamberlainDuquetteArea, Simplify};
use geojson::{Feature, FeatureCollection, GeoJson};
use mobility_map_models::{Admin, TopologyBlob};
use mobility_map_store::MobilityStore;

use crate::{ImportError, ImportReport};

/// Douglas-Peucker tolerance (degrees) for the reduced topology level.
const SIMPLIFY_EPSILON: f64 = 0.01;

/// Simplification levels stored per country.
const FULL_FIDELITY: f64 = 1.0;
const REDUCED: f64 = 0.4;

/// Name property keys recognized on boundary features, in priority order.
const NAME_KEYS: &[&str] = &["DIST_NAME", "NAME_2", "NOMBRE_MPI", "NAME_1", "NAME_0", "name"];

/// Imports a country's admin boundaries from a `GeoJSON` feature
/// collection.
///
/// Each feature becomes one [`Admin`] with a derived code
/// (`<iso>_<id_0>_<id_1>_<id_2>_<source>`, missing ids skipped), a name
/// from the first recognized name property, and a spherical area in km².
/// All admins for the country are replaced (delete-then-insert), and the
/// country's topology blobs are regenerated at both simplification levels.
///
/// Features without usable geometry are reported as row errors and
/// skipped.
///
/// # Errors
///
/// Returns [`ImportError`] if the file cannot be read, is not a feature
/// collection, or the store rejects a write.
pub async fn import_admins(
    store: &dyn MobilityStore,
    country_code: &str,
    geojson_path: &Path,
    source: &str,
) -> Result<ImportReport, ImportError> {
    let file_name = geojson_path
        .file_name()
        .map_or_else(|| geojson_path.display().to_string(), |n| {
            n.to_string_lossy().to_string()
        });
    log::info!("importing admins for {country_code} from {file_name}");

    let raw = tokio::fs::read_to_string(geojson_path).await?;
    let geojson: GeoJson = raw.parse()?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(ImportError::InvalidGeoJson {
            message: "expected a FeatureCollection".to_string(),
        });
    };

    let mut admins = Vec::new();
    let mut full_features = Vec::new();
    let mut reduced_features = Vec::new();
    let mut row_errors = Vec::new();

    for (i, feature) in collection.features.iter().enumerate() {
        match build_admin(feature, country_code, source) {
            Ok((admin, full, reduced)) => {
                admins.push(admin);
                full_features.push(full);
                reduced_features.push(reduced);
            }
            Err(message) => row_errors.push(format!("feature {i}: {message}")),
        }
    }

    store.delete_admins(country_code).await?;
    let inserted = store.insert_admins(&admins).await?;

    store
        .replace_topologies(
            country_code,
            &[
                topology_blob(country_code, FULL_FIDELITY, full_features)?,
                topology_blob(country_code, REDUCED, reduced_features)?,
            ],
        )
        .await?;

    log::info!(
        "{country_code}: {inserted} admins, {} skipped features",
        row_errors.len()
    );
    let mut report = ImportReport {
        inserted,
        ..ImportReport::default()
    };
    report.file_errors.insert(file_name, row_errors);
    Ok(report)
}

/// Builds one admin plus its full-fidelity and reduced features.
fn build_admin(
    feature: &Feature,
    country_code: &str,
    source: &str,
) -> Result<(Admin, Feature, Feature), String> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| "missing geometry".to_string())?;
    let geo_geom: geo::Geometry<f64> = geometry
        .clone()
        .try_into()
        .map_err(|e| format!("unusable geometry: {e}"))?;

    let admin_code = derive_admin_code(feature, country_code, source);
    let name = NAME_KEYS
        .iter()
        .find_map(|key| property_string(feature, key))
        .unwrap_or_else(|| admin_code.clone());
    let geo_area_sqkm = geo_geom.chamberlain_duquette_unsigned_area() / 1_000_000.0;

    let mut enriched = feature.clone();
    {
        let properties = enriched.properties.get_or_insert_with(Default::default);
        properties.insert(
            "country_code".to_string(),
            serde_json::Value::from(country_code),
        );
        properties.insert("admin_code".to_string(), serde_json::Value::from(admin_code.clone()));
        properties.insert("name".to_string(), serde_json::Value::from(name.clone()));
        properties.insert(
            "geo_area_sqkm".to_string(),
            serde_json::Value::from(geo_area_sqkm),
        );
        properties.insert("pub_src".to_string(), serde_json::Value::from(source));
    }

    let mut reduced = enriched.clone();
    reduced.geometry = Some(geojson::Geometry::new(geojson::Value::from(
        &simplify_geometry(&geo_geom),
    )));

    let geo_feature = serde_json::to_value(&enriched)
        .map_err(|e| format!("unserializable feature: {e}"))?;

    Ok((
        Admin {
            country_code: country_code.to_string(),
            admin_code,
            name,
            geo_area_sqkm,
            geo_feature,
        },
        enriched,
        reduced,
    ))
}

/// Derives the admin code from the feature's `ISO`/`ID_0`/`ID_1`/`ID_2`
/// properties, skipping missing ids.
fn derive_admin_code(feature: &Feature, country_code: &str, source: &str) -> String {
    let iso = property_string(feature, "ISO")
        .map_or_else(|| country_code.to_string(), |iso| iso.to_lowercase());

    let mut code = iso;
    for key in ["ID_0", "ID_1", "ID_2"] {
        if let Some(id) = property_string(feature, key) {
            code.push('_');
            code.push_str(&id);
        }
    }
    code.push('_');
    code.push_str(source);
    code
}

/// A feature property as a string, accepting string and numeric values.
fn property_string(feature: &Feature, key: &str) -> Option<String> {
    match feature.properties.as_ref()?.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Douglas-Peucker simplification for the geometry kinds that carry line
/// work; point-like geometries pass through unchanged.
fn simplify_geometry(geometry: &geo::Geometry<f64>) -> geo::Geometry<f64> {
    match geometry {
        geo::Geometry::LineString(g) => g.simplify(SIMPLIFY_EPSILON).into(),
        geo::Geometry::MultiLineString(g) => g.simplify(SIMPLIFY_EPSILON).into(),
        geo::Geometry::Polygon(g) => g.simplify(SIMPLIFY_EPSILON).into(),
        geo::Geometry::MultiPolygon(g) => g.simplify(SIMPLIFY_EPSILON).into(),
        other => other.clone(),
    }
}

/// Wraps enriched features into a stored topology blob.
fn topology_blob(
    country_code: &str,
    simplification: f64,
    features: Vec<Feature>,
) -> Result<TopologyBlob, ImportError> {
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let topology =
        serde_json::to_value(&collection).map_err(|e| ImportError::InvalidGeoJson {
            message: format!("unserializable topology: {e}"),
        })?;
    Ok(TopologyBlob {
        country_code: country_code.to_string(),
        simplification,
        topology,
    })
}
