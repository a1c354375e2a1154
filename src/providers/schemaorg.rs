use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::SchemaOrgEndpoint;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::listing::parse_human_size;
use crate::metadata::MetadataDocument;
use crate::providers::Provider;
use crate::resolver::{host_matches, parse_doi, parse_http_url};

/// Landing pages that embed a schema.org `Dataset` as JSON-LD. Configured
/// for PANGAEA by default.
pub struct SchemaOrgProvider {
    name: String,
    http: HttpClient,
    endpoint: SchemaOrgEndpoint,
}

impl SchemaOrgProvider {
    pub fn new(name: impl Into<String>, http: HttpClient, endpoint: SchemaOrgEndpoint) -> Self {
        Self {
            name: name.into(),
            http,
            endpoint,
        }
    }

    pub fn pangaea(http: HttpClient, endpoint: SchemaOrgEndpoint) -> Self {
        Self::new("pangaea", http, endpoint)
    }

    fn landing_url(&self, key: &RecordKey) -> String {
        format!("{}{}", self.endpoint.landing_base, key.as_str())
    }
}

impl Provider for SchemaOrgProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        let label = regex::escape(&self.endpoint.doi_suffix_label.to_lowercase());
        if let Some(doi) = parse_doi(reference) {
            if doi.prefix() != self.endpoint.doi_prefix {
                return None;
            }
            let re = Regex::new(&format!(r"^{label}\.(\d+)$")).ok()?;
            return re
                .captures(doi.suffix())
                .and_then(|caps| caps.get(1))
                .map(|id| RecordKey::new(id.as_str()));
        }
        let url = parse_http_url(reference)?;
        if !host_matches(&url, &self.endpoint.hosts) {
            return None;
        }
        let prefix = regex::escape(&self.endpoint.doi_prefix);
        let re = Regex::new(&format!(r"(?i)^/{prefix}/{label}\.(\d+)/?$")).ok()?;
        re.captures(url.path())
            .and_then(|caps| caps.get(1))
            .map(|id| RecordKey::new(id.as_str()))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let url = self.landing_url(key);
        let html = self.http.get_text(&url)?;
        let dataset = extract_dataset(&html).ok_or_else(|| {
            GeoextentError::Upstream(format!("{url}: no schema.org Dataset in landing page"))
        })?;
        Ok(parse_dataset(&dataset))
    }
}

/// First JSON-LD block whose `@type` is (or includes) `Dataset`.
pub fn extract_dataset(html: &str) -> Option<Value> {
    let re = Regex::new(
        r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
    )
    .unwrap();
    let mut fallback = None;
    for caps in re.captures_iter(html) {
        let Some(body) = caps.get(1) else {
            continue;
        };
        let value: Value = match serde_json::from_str(body.as_str().trim()) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "skipping unparseable JSON-LD block");
                continue;
            }
        };
        let candidates = match value {
            Value::Array(items) => items,
            other => match other.get("@graph").and_then(Value::as_array) {
                Some(graph) => graph.clone(),
                None => vec![other],
            },
        };
        for candidate in candidates {
            if is_dataset(&candidate) {
                return Some(candidate);
            }
            if fallback.is_none() {
                fallback = Some(candidate);
            }
        }
    }
    fallback
}

fn is_dataset(value: &Value) -> bool {
    match &value["@type"] {
        Value::String(kind) => kind == "Dataset",
        Value::Array(kinds) => kinds.iter().any(|kind| kind.as_str() == Some("Dataset")),
        _ => false,
    }
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

pub fn parse_dataset(dataset: &Value) -> MetadataDocument {
    let mut doc = MetadataDocument {
        title: dataset["name"].as_str().map(|title| title.trim().to_string()),
        restricted: dataset["isAccessibleForFree"].as_bool() == Some(false),
        ..Default::default()
    };

    for place in as_list(&dataset["spatialCoverage"]) {
        let mut found = false;
        for geo in as_list(&place["geo"]) {
            if let Some(extent) = parse_geo(geo) {
                doc.push_geometry(extent);
                found = true;
            }
        }
        if !found {
            let name = place["name"].as_str().or_else(|| place.as_str());
            if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
                doc.place_names.push(name.to_string());
            }
        }
    }

    for coverage in as_list(&dataset["temporalCoverage"]) {
        if let Some(interval) = coverage.as_str() {
            let (start, end) = interval.split_once('/').unwrap_or((interval, interval));
            let start = Some(start.trim()).filter(|value| !value.is_empty() && *value != "..");
            let end = Some(end.trim()).filter(|value| !value.is_empty() && *value != "..");
            doc.push_temporal(TemporalExtent::parse(start, end));
        }
    }

    for distribution in as_list(&dataset["distribution"]) {
        let Some(url) = distribution["contentUrl"].as_str() else {
            continue;
        };
        let name = distribution["name"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| url_file_name(url));
        let size = distribution["contentSize"]
            .as_str()
            .map(parse_human_size)
            .or_else(|| distribution["contentSize"].as_u64())
            .unwrap_or(0);
        doc.files.push(CandidateFile::from_metadata(name, url, size));
    }
    doc
}

/// `GeoShape.box` is "south west north east"; `GeoCoordinates` is a point.
fn parse_geo(geo: &Value) -> Option<Result<GeometryExtent, GeoextentError>> {
    if let Some(shape) = geo["box"].as_str() {
        let numbers: Vec<f64> = shape
            .split(|ch: char| ch.is_whitespace() || ch == ',')
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect();
        if let &[south, west, north, east] = numbers.as_slice() {
            return Some(GeometryExtent::new(west, south, east, north));
        }
        return None;
    }
    let lat = number(&geo["latitude"])?;
    let lon = number(&geo["longitude"])?;
    Some(GeometryExtent::point(lon, lat))
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string()
}
