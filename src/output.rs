use std::fs;
use std::io::{self, Write};
use std::path::Path;

use geojson::{Feature, JsonObject};
use serde::Serialize;
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink, ProvidersResult};
use crate::domain::RecordKey;
use crate::download::DownloadedFile;
use crate::error::GeoextentError;
use crate::extent::{CRS_WGS84, MergedExtent, MergedGeometry};
use crate::fallback::{ChainOutcome, FallbackState, Transition};

/// What one extraction produced. Absent keys mean the value was not
/// requested or could not be extracted.
#[derive(Debug, Clone, Serialize)]
pub struct ExtentResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbox: Option<[String; 2]>,
    /// `[start, end]` flags for bounds borrowed from the opposite side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbox_inferred: Option<[bool; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    pub convex_hull: bool,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hull: Option<Vec<[f64; 2]>>,
    pub source: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub strategy: FallbackState,
    pub derived_from_files: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<DownloadedFile>,
    pub transitions: Vec<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip)]
    pub geometry: Option<MergedGeometry>,
}

impl ExtentResult {
    pub fn new(
        source: &str,
        key: &RecordKey,
        outcome: ChainOutcome,
        merged: MergedExtent,
        convex_hull: bool,
    ) -> Self {
        let bbox = merged.geometry.as_ref().map(|geometry| geometry.envelope().as_array());
        let hull = match &merged.geometry {
            Some(MergedGeometry::Hull { ring }) => Some(ring.clone()),
            _ => None,
        };
        let inferred = merged
            .temporal
            .map(|temporal| [temporal.start_inferred, temporal.end_inferred])
            .filter(|flags| flags.iter().any(|flag| *flag));
        Self {
            bbox,
            tbox: merged.temporal.map(|temporal| temporal.as_strings()),
            tbox_inferred: inferred,
            crs: bbox.map(|_| CRS_WGS84.to_string()),
            convex_hull,
            format: "remote".to_string(),
            hull,
            source: source.to_string(),
            dataset_id: key.to_string(),
            title: outcome.title,
            strategy: outcome.strategy,
            derived_from_files: outcome.derived,
            files: outcome.files,
            transitions: outcome.transitions,
            output: None,
            geometry: merged.geometry,
        }
    }

    /// GeoJSON Feature carrying the merged geometry (or `null`) and the
    /// provenance properties.
    pub fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("source".to_string(), Value::from(self.source.clone()));
        properties.insert("dataset_id".to_string(), Value::from(self.dataset_id.clone()));
        properties.insert(
            "title".to_string(),
            self.title.clone().map(Value::from).unwrap_or(Value::Null),
        );
        if let Some([start, end]) = &self.tbox {
            properties.insert("start_time".to_string(), Value::from(start.clone()));
            properties.insert("end_time".to_string(), Value::from(end.clone()));
        }
        Feature {
            bbox: None,
            geometry: self.geometry.as_ref().map(MergedGeometry::to_geojson),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

pub fn write_feature(path: &Path, feature: &Feature) -> Result<(), GeoextentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            GeoextentError::Filesystem(format!("create {}: {err}", parent.display()))
        })?;
    }
    let json = serde_json::to_string_pretty(feature)
        .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
    fs::write(path, json)
        .map_err(|err| GeoextentError::Filesystem(format!("write {}: {err}", path.display())))
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_extent(result: &ExtentResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_providers(result: &ProvidersResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
