use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::GeoextentError;

pub const CRS_WGS84: &str = "4326";

/// Axis-aligned rectangle in EPSG:4326, `[west, south, east, north]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeometryExtent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeometryExtent {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, GeoextentError> {
        let coords = [west, south, east, north];
        if coords.iter().any(|value| !value.is_finite()) {
            return Err(GeoextentError::InvalidExtent(format!(
                "non-finite coordinate in {coords:?}"
            )));
        }
        if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
            return Err(GeoextentError::InvalidExtent(format!(
                "longitude out of range in {coords:?}"
            )));
        }
        if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
            return Err(GeoextentError::InvalidExtent(format!(
                "latitude out of range in {coords:?}"
            )));
        }
        if west > east || south > north {
            return Err(GeoextentError::InvalidExtent(format!(
                "inverted bounds in {coords:?}"
            )));
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    pub fn point(lon: f64, lat: f64) -> Result<Self, GeoextentError> {
        Self::new(lon, lat, lon, lat)
    }

    pub fn is_point(&self) -> bool {
        self.west == self.east && self.south == self.north
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.west, self.south],
            [self.east, self.south],
            [self.east, self.north],
            [self.west, self.north],
        ]
    }

    pub fn union(&self, other: &GeometryExtent) -> GeometryExtent {
        GeometryExtent {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    pub fn to_geojson(&self) -> geojson::Geometry {
        if self.is_point() {
            return geojson::Geometry::new(geojson::Value::Point(vec![self.west, self.south]));
        }
        let mut ring: Vec<Vec<f64>> = self.corners().iter().map(|c| c.to_vec()).collect();
        ring.push(vec![self.west, self.south]);
        geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))
    }
}

/// Time interval at day granularity. Either bound may be missing on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalExtent {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl TemporalExtent {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, GeoextentError> {
        if start.is_none() && end.is_none() {
            return Err(GeoextentError::InvalidExtent(
                "temporal extent without bounds".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(GeoextentError::InvalidExtent(format!(
                    "temporal extent ends before it starts: {start} > {end}"
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, GeoextentError> {
        Self::new(start.and_then(parse_iso_date), end.and_then(parse_iso_date))
    }

    pub fn instant(date: NaiveDate) -> Self {
        Self {
            start: Some(date),
            end: Some(date),
        }
    }
}

/// Parses `YYYY`, `YYYY-MM`, `YYYY-MM-DD` and full ISO 8601 timestamps down to
/// the calendar day.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    if let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        return Some(date);
    }
    if value.len() == 7 {
        return NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok();
    }
    if value.len() == 4 && value.chars().all(|ch| ch.is_ascii_digit()) {
        return NaiveDate::parse_from_str(&format!("{value}-01-01"), "%Y-%m-%d").ok();
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    #[default]
    Bbox,
    ConvexHull,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergedGeometry {
    Bbox { extent: GeometryExtent },
    /// Closed ring: first coordinate repeated as last.
    Hull { ring: Vec<[f64; 2]> },
}

impl MergedGeometry {
    pub fn envelope(&self) -> GeometryExtent {
        match self {
            MergedGeometry::Bbox { extent } => *extent,
            MergedGeometry::Hull { ring } => {
                let mut envelope = GeometryExtent {
                    west: f64::INFINITY,
                    south: f64::INFINITY,
                    east: f64::NEG_INFINITY,
                    north: f64::NEG_INFINITY,
                };
                for [x, y] in ring {
                    envelope.west = envelope.west.min(*x);
                    envelope.south = envelope.south.min(*y);
                    envelope.east = envelope.east.max(*x);
                    envelope.north = envelope.north.max(*y);
                }
                envelope
            }
        }
    }

    pub fn unique_vertices(&self) -> usize {
        match self {
            MergedGeometry::Bbox { extent } if extent.is_point() => 1,
            MergedGeometry::Bbox { .. } => 4,
            MergedGeometry::Hull { ring } => ring.len().saturating_sub(1),
        }
    }

    pub fn to_geojson(&self) -> geojson::Geometry {
        match self {
            MergedGeometry::Bbox { extent } => extent.to_geojson(),
            MergedGeometry::Hull { ring } => {
                let coords: Vec<Vec<f64>> = ring.iter().map(|c| c.to_vec()).collect();
                let value = match self.unique_vertices() {
                    0 | 1 => geojson::Value::Point(coords.first().cloned().unwrap_or_default()),
                    2 => geojson::Value::LineString(coords[..2].to_vec()),
                    _ => geojson::Value::Polygon(vec![coords]),
                };
                geojson::Geometry::new(value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedTemporal {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// The start was borrowed from an end bound because nothing else set it.
    pub start_inferred: bool,
    pub end_inferred: bool,
}

impl MergedTemporal {
    pub fn as_strings(&self) -> [String; 2] {
        [
            self.start.format("%Y-%m-%d").to_string(),
            self.end.format("%Y-%m-%d").to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedExtent {
    pub geometry: Option<MergedGeometry>,
    pub temporal: Option<MergedTemporal>,
}

impl MergedExtent {
    pub fn is_empty(&self) -> bool {
        self.geometry.is_none() && self.temporal.is_none()
    }
}

pub fn merge(
    geometries: &[GeometryExtent],
    temporals: &[TemporalExtent],
    mode: MergeMode,
) -> MergedExtent {
    MergedExtent {
        geometry: merge_geometries(geometries, mode),
        temporal: merge_temporal(temporals),
    }
}

pub fn merge_geometries(geometries: &[GeometryExtent], mode: MergeMode) -> Option<MergedGeometry> {
    let (first, rest) = geometries.split_first()?;
    match mode {
        MergeMode::Bbox => {
            let extent = rest.iter().fold(*first, |acc, item| acc.union(item));
            Some(MergedGeometry::Bbox { extent })
        }
        MergeMode::ConvexHull => {
            let points: Vec<[f64; 2]> = geometries
                .iter()
                .flat_map(|extent| extent.corners())
                .collect();
            Some(MergedGeometry::Hull {
                ring: convex_hull(&points),
            })
        }
    }
}

pub fn merge_temporal(temporals: &[TemporalExtent]) -> Option<MergedTemporal> {
    let starts = temporals.iter().filter_map(|t| t.start);
    let ends = temporals.iter().filter_map(|t| t.end);
    let min_start = starts.clone().min();
    let max_end = ends.clone().max();

    let (start, start_inferred) = match min_start {
        Some(start) => (start, false),
        None => (ends.min()?, true),
    };
    let (end, end_inferred) = match max_end {
        Some(end) => (end, false),
        None => (starts.max()?, true),
    };

    Some(MergedTemporal {
        start,
        end,
        start_inferred,
        end_inferred,
    })
}

/// Andrew's monotone chain. Returns a closed counter-clockwise ring without
/// collinear vertices; one or two distinct input points yield a degenerate
/// ring of that many vertices.
pub fn convex_hull(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut points: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|[x, y]| x.is_finite() && y.is_finite())
        .collect();
    points.sort_by(|a, b| compare_points(a, b));
    points.dedup();

    if points.len() < 3 {
        let mut ring = points.clone();
        if let Some(first) = points.first() {
            ring.push(*first);
        }
        return ring;
    }

    let mut lower: Vec<[f64; 2]> = Vec::with_capacity(points.len());
    for point in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *point) <= 0.0
        {
            lower.pop();
        }
        lower.push(*point);
    }

    let mut upper: Vec<[f64; 2]> = Vec::with_capacity(points.len());
    for point in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *point) <= 0.0
        {
            upper.pop();
        }
        upper.push(*point);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    if let Some(first) = lower.first().copied() {
        lower.push(first);
    }
    lower
}

fn compare_points(a: &[f64; 2], b: &[f64; 2]) -> Ordering {
    a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1]))
}

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}
