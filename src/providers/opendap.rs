use regex::Regex;
use tracing::debug;

use crate::config::OpendapEndpoint;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::listing::{normalize_listing_url, parse_directory_listing};
use crate::metadata::MetadataDocument;
use crate::providers::Provider;
use crate::resolver::{host_matches, parse_http_url};

/// Hyrax response suffixes that point at a dataset rather than being one.
const RESPONSE_SUFFIXES: &[&str] = &[
    ".dmr.html", ".dmr.xml", ".html", ".dds", ".das", ".ddx", ".info", ".rdf",
];
const DATA_EXTENSIONS: &[&str] = &["nc", "nc4", "h5", "hdf", "he5"];
/// Attribute reads are one round trip each; a few files are enough to
/// cover a directory of homogeneous granules.
const MAX_DAS_READS: usize = 3;

/// OPeNDAP (Hyrax) directories: files come from the directory listing and
/// coverage from the ACDD attributes of each granule's DAS.
pub struct OpendapProvider {
    name: String,
    http: HttpClient,
    endpoint: OpendapEndpoint,
}

impl OpendapProvider {
    pub fn new(http: HttpClient, endpoint: OpendapEndpoint) -> Self {
        Self {
            name: format!("opendap:{}", endpoint.host),
            http,
            endpoint,
        }
    }

    fn listing_url(&self, key: &RecordKey) -> String {
        format!("{}{}/", self.endpoint.base.trim_end_matches('/'), key.as_str())
    }
}

impl Provider for OpendapProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        let url = parse_http_url(reference)?;
        if !host_matches(&url, std::slice::from_ref(&self.endpoint.host)) {
            return None;
        }
        let path = url.path();
        if !path.starts_with(&self.endpoint.path_prefix) {
            return None;
        }
        let path = path
            .strip_suffix("contents.html")
            .or_else(|| path.strip_suffix("catalog.html"))
            .unwrap_or(path)
            .trim_end_matches('/');
        (path.len() >= self.endpoint.path_prefix.trim_end_matches('/').len() && !path.is_empty())
            .then(|| RecordKey::new(path))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let listing_url = normalize_listing_url(&self.listing_url(key))?;
        let html = self.http.get_text(listing_url.as_str())?;
        let files = dataset_files(parse_directory_listing(&html, listing_url.as_str())?);

        let mut doc = MetadataDocument {
            listing_url: Some(listing_url.to_string()),
            ..Default::default()
        };
        let granules = files.iter().filter(|file| {
            file.extension()
                .is_some_and(|ext| DATA_EXTENSIONS.contains(&ext.as_str()))
        });
        for file in granules.take(MAX_DAS_READS) {
            let das_url = format!("{}.das", file.url);
            match self.http.get_text(&das_url) {
                Ok(das) => apply_acdd(&mut doc, &das),
                Err(err) => debug!(url = %das_url, error = %err, "DAS unavailable"),
            }
        }
        if doc.title.is_none() {
            doc.title = key
                .as_str()
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .map(str::to_string);
        }
        doc.files = files;
        Ok(doc)
    }
}

/// Folds Hyrax per-dataset response links back onto the dataset file.
fn dataset_files(entries: Vec<CandidateFile>) -> Vec<CandidateFile> {
    let mut files: Vec<CandidateFile> = Vec::new();
    for mut entry in entries {
        for suffix in RESPONSE_SUFFIXES {
            if let (Some(name), Some(url)) =
                (entry.name.strip_suffix(suffix), entry.url.strip_suffix(suffix))
            {
                entry.name = name.to_string();
                entry.url = url.to_string();
                break;
            }
        }
        if entry.name.is_empty() {
            continue;
        }
        match files.iter_mut().find(|file| file.url == entry.url) {
            Some(existing) => existing.size = existing.size.max(entry.size),
            None => files.push(entry),
        }
    }
    files
}

fn das_attribute(das: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"(?m)^\s*\w+\s+{name}\s+"?([^";]*?)"?\s*;"#);
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(das)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn apply_acdd(doc: &mut MetadataDocument, das: &str) {
    let number = |name: &str| das_attribute(das, name).and_then(|value| value.parse::<f64>().ok());
    if let (Some(west), Some(south), Some(east), Some(north)) = (
        number("geospatial_lon_min"),
        number("geospatial_lat_min"),
        number("geospatial_lon_max"),
        number("geospatial_lat_max"),
    ) {
        doc.push_geometry(GeometryExtent::new(west, south, east, north));
    }
    let start = das_attribute(das, "time_coverage_start");
    let end = das_attribute(das, "time_coverage_end");
    if start.is_some() || end.is_some() {
        doc.push_temporal(TemporalExtent::parse(start.as_deref(), end.as_deref()));
    }
    if doc.title.is_none() {
        doc.title = das_attribute(das, "title");
    }
}
