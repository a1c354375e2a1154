use std::fs;
use std::path::{Path, PathBuf};

use geojson::{GeoJson, Geometry, Value};
use tracing::debug;

use crate::extent::GeometryExtent;

#[derive(Debug, Clone, Copy)]
struct Envelope {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl Envelope {
    fn empty() -> Self {
        Self {
            west: f64::INFINITY,
            south: f64::INFINITY,
            east: f64::NEG_INFINITY,
            north: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, position: &[f64]) {
        let (Some(x), Some(y)) = (position.first(), position.get(1)) else {
            return;
        };
        self.west = self.west.min(*x);
        self.south = self.south.min(*y);
        self.east = self.east.max(*x);
        self.north = self.north.max(*y);
    }

    fn into_extent(self) -> Option<GeometryExtent> {
        if self.west > self.east {
            return None;
        }
        match GeometryExtent::new(self.west, self.south, self.east, self.north) {
            Ok(extent) => Some(extent),
            Err(err) => {
                debug!(error = %err, "coordinates are not WGS84 degrees");
                None
            }
        }
    }
}

fn walk_value(value: &Value, envelope: &mut Envelope) {
    match value {
        Value::Point(position) => envelope.add(position),
        Value::MultiPoint(positions) | Value::LineString(positions) => {
            positions.iter().for_each(|p| envelope.add(p));
        }
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter().flatten().for_each(|p| envelope.add(p));
        }
        Value::MultiPolygon(polygons) => {
            polygons.iter().flatten().flatten().for_each(|p| envelope.add(p));
        }
        Value::GeometryCollection(geometries) => {
            geometries.iter().for_each(|g| walk_value(&g.value, envelope));
        }
    }
}

pub fn envelope_of_geometry(geometry: &Geometry) -> Option<GeometryExtent> {
    let mut envelope = Envelope::empty();
    walk_value(&geometry.value, &mut envelope);
    envelope.into_extent()
}

pub fn envelope_of_geojson(geojson: &GeoJson) -> Option<GeometryExtent> {
    let mut envelope = Envelope::empty();
    match geojson {
        GeoJson::Geometry(geometry) => walk_value(&geometry.value, &mut envelope),
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &feature.geometry {
                walk_value(&geometry.value, &mut envelope);
            }
        }
        GeoJson::FeatureCollection(collection) => {
            for feature in &collection.features {
                if let Some(geometry) = &feature.geometry {
                    walk_value(&geometry.value, &mut envelope);
                }
            }
        }
    }
    envelope.into_extent()
}

/// Envelopes of the given GeoJSON files. Files that are not GeoJSON or not
/// in degrees are skipped.
pub fn derive_from_files(paths: &[PathBuf]) -> Vec<GeometryExtent> {
    let mut extents = Vec::new();
    for path in paths {
        if !is_geojson_candidate(path) || !path.is_file() {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        match content.parse::<GeoJson>() {
            Ok(geojson) => {
                if let Some(extent) = envelope_of_geojson(&geojson) {
                    debug!(path = %path.display(), "derived extent from file");
                    extents.push(extent);
                }
            }
            Err(err) => debug!(path = %path.display(), error = %err, "not a GeoJSON file"),
        }
    }
    extents
}

fn is_geojson_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "geojson" | "json"))
        .unwrap_or(false)
}
