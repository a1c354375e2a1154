use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::CandidateFile;

/// Vector formats, shapefile sidecars, rasters and the archives they usually
/// ship in. Sidecars stay because a shapefile is only readable as a set.
pub const GEOSPATIAL_EXTENSIONS: &[&str] = &[
    "shp", "dbf", "shx", "prj", "geojson", "gml", "kml", "gpx", "tif", "tiff", "nc", "asc", "zip",
    "tar", "gz",
];

pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub fn filter_geospatial(
    files: Vec<CandidateFile>,
    skip_non_geospatial: bool,
    extra_extensions: &BTreeSet<String>,
) -> Vec<CandidateFile> {
    if !skip_non_geospatial {
        return files;
    }
    let extras: BTreeSet<String> = extra_extensions
        .iter()
        .map(|ext| normalize_extension(ext))
        .filter(|ext| !ext.is_empty())
        .collect();
    let before = files.len();
    let kept: Vec<CandidateFile> = files
        .into_iter()
        .filter(|file| match file.extension() {
            Some(ext) => GEOSPATIAL_EXTENSIONS.contains(&ext.as_str()) || extras.contains(&ext),
            None => false,
        })
        .collect();
    debug!(before, after = kept.len(), "filtered non-geospatial files");
    kept
}
