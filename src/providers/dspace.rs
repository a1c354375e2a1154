use regex::Regex;
use serde_json::Value;

use crate::config::DspaceEndpoint;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::metadata::MetadataDocument;
use crate::providers::Provider;
use crate::resolver::{host_matches, is_uuid, parse_http_url};

const ORIGINAL_BUNDLE: &str = "ORIGINAL";

/// DSpace 7 REST API. Keys are item UUIDs or handles (`prefix/suffix`).
pub struct DspaceProvider {
    name: String,
    http: HttpClient,
    endpoint: DspaceEndpoint,
}

impl DspaceProvider {
    pub fn new(http: HttpClient, endpoint: DspaceEndpoint) -> Self {
        Self {
            name: format!("dspace:{}", endpoint.host),
            http,
            endpoint,
        }
    }

    fn api(&self) -> &str {
        self.endpoint.api.trim_end_matches('/')
    }

    fn item_url(&self, uuid: &str) -> String {
        format!("{}/core/items/{uuid}", self.api())
    }

    fn handle_url(&self, handle: &str) -> String {
        format!("{}/pid/find?id=hdl:{handle}", self.api())
    }

    fn item_uuid(&self, key: &RecordKey) -> Result<String, GeoextentError> {
        if is_uuid(key.as_str()) {
            return Ok(key.as_str().to_lowercase());
        }
        let item: Value = self.http.get_json(&self.handle_url(key.as_str()))?;
        item["uuid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GeoextentError::NotFound(format!("handle {key}")))
    }
}

impl Provider for DspaceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        let url = parse_http_url(reference)?;
        if !host_matches(&url, std::slice::from_ref(&self.endpoint.host)) {
            return None;
        }
        let items = Regex::new(
            r"/(?:items|entities/[^/]+)/([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})(?:/|$)",
        )
        .unwrap();
        if let Some(uuid) = items.captures(url.path()).and_then(|caps| caps.get(1)) {
            return Some(RecordKey::new(uuid.as_str().to_lowercase()));
        }
        let handle = Regex::new(r"/handle/(\d+(?:\.\d+)*/\d+)(?:/|$)").unwrap();
        handle
            .captures(url.path())
            .and_then(|caps| caps.get(1))
            .map(|handle| RecordKey::new(handle.as_str()))
    }

    fn probe_reference(&self, reference: &str) -> Option<RecordKey> {
        let reference = reference.trim();
        let handle = Regex::new(r"^\d+(?:\.\d+)*/\d+$").unwrap();
        let url = if is_uuid(reference) {
            self.item_url(&reference.to_lowercase())
        } else if handle.is_match(reference) && !reference.starts_with("10.") {
            self.handle_url(reference)
        } else {
            return None;
        };
        let key = if is_uuid(reference) {
            reference.to_lowercase()
        } else {
            reference.to_string()
        };
        matches!(self.http.exists(&url), Ok(true)).then(|| RecordKey::new(key))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let uuid = self.item_uuid(key)?;
        let url = format!("{}?embed=bundles/bitstreams", self.item_url(&uuid));
        let item: Value = self.http.get_json(&url)?;
        if item["uuid"].is_null() {
            return Err(GeoextentError::NotFound(url));
        }
        Ok(parse_item(&item))
    }
}

fn metadata_values<'a>(item: &'a Value, field: &str) -> Vec<&'a str> {
    item["metadata"][field]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry["value"].as_str())
        .collect()
}

pub fn parse_item(item: &Value) -> MetadataDocument {
    let mut doc = MetadataDocument {
        title: metadata_values(item, "dc.title").first().map(|title| title.to_string()),
        ..Default::default()
    };

    doc.restricted = ["dc.rights.accessrights", "dcterms.accessRights"]
        .iter()
        .flat_map(|field| metadata_values(item, field))
        .any(|value| {
            let value = value.to_lowercase();
            value.contains("restricted") || value.contains("embargo")
        });

    for value in metadata_values(item, "dc.coverage.spatial") {
        match parse_dcmi_box(value) {
            Some(extent) => doc.push_geometry(extent),
            None => doc.place_names.push(value.trim().to_string()),
        }
    }
    for value in metadata_values(item, "dc.coverage.temporal") {
        let (start, end) = parse_dcmi_period(value);
        doc.push_temporal(TemporalExtent::parse(start.as_deref(), end.as_deref()));
    }

    let bundles = item["_embedded"]["bundles"]["_embedded"]["bundles"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    for bundle in bundles
        .iter()
        .filter(|bundle| bundle["name"].as_str() == Some(ORIGINAL_BUNDLE))
    {
        let bitstreams = bundle["_embedded"]["bitstreams"]["_embedded"]["bitstreams"]
            .as_array()
            .into_iter()
            .flatten();
        for bitstream in bitstreams {
            let (Some(name), Some(url)) = (
                bitstream["name"].as_str(),
                bitstream["_links"]["content"]["href"].as_str(),
            ) else {
                continue;
            };
            let size = bitstream["sizeBytes"].as_u64().unwrap_or(0);
            doc.files.push(CandidateFile::from_metadata(name, url, size));
        }
    }
    doc
}

/// DCMI Box: `northlimit=55; southlimit=53; eastlimit=11; westlimit=9`.
/// A `north=..;east=..` pair is read as a point.
fn parse_dcmi_box(value: &str) -> Option<Result<GeometryExtent, GeoextentError>> {
    let mut north = None;
    let mut south = None;
    let mut east = None;
    let mut west = None;
    for part in value.split(';') {
        let Some((name, number)) = part.split_once('=') else {
            continue;
        };
        let Ok(number) = number.trim().parse::<f64>() else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "northlimit" => north = Some(number),
            "southlimit" => south = Some(number),
            "eastlimit" => east = Some(number),
            "westlimit" => west = Some(number),
            "north" => {
                north = Some(number);
                south = Some(number);
            }
            "east" => {
                east = Some(number);
                west = Some(number);
            }
            _ => {}
        }
    }
    match (west, south, east, north) {
        (Some(west), Some(south), Some(east), Some(north)) => {
            Some(GeometryExtent::new(west, south, east, north))
        }
        _ => None,
    }
}

/// DCMI Period (`start=..; end=..`) or an ISO interval `a/b`.
fn parse_dcmi_period(value: &str) -> (Option<String>, Option<String>) {
    if value.contains('=') {
        let mut start = None;
        let mut end = None;
        for part in value.split(';') {
            if let Some((name, date)) = part.split_once('=') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "start" => start = Some(date.trim().to_string()),
                    "end" => end = Some(date.trim().to_string()),
                    _ => {}
                }
            }
        }
        return (start, end);
    }
    let (start, end) = value.split_once('/').unwrap_or((value, value));
    let clean = |date: &str| Some(date.trim().to_string()).filter(|date| !date.is_empty());
    (clean(start), clean(end))
}
