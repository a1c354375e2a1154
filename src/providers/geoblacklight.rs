use regex::Regex;
use serde_json::Value;

use crate::config::GeoBlacklightEndpoint;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::metadata::MetadataDocument;
use crate::providers::{Provider, Strategy};
use crate::resolver::{host_matches, parse_http_url};

const DOWNLOAD_URL_KEY: &str = "http://schema.org/downloadUrl";

/// GeoBlacklight portals. Each record exposes one download, so the only
/// strategy is the bulk archive.
pub struct GeoBlacklightProvider {
    name: String,
    http: HttpClient,
    endpoint: GeoBlacklightEndpoint,
}

impl GeoBlacklightProvider {
    pub fn new(http: HttpClient, endpoint: GeoBlacklightEndpoint) -> Self {
        Self {
            name: format!("geoblacklight:{}", endpoint.host),
            http,
            endpoint,
        }
    }
}

impl Provider for GeoBlacklightProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        let url = parse_http_url(reference)?;
        if !host_matches(&url, std::slice::from_ref(&self.endpoint.host)) {
            return None;
        }
        let re = Regex::new(r"^/catalog/([^/]+?)(?:/raw)?/?$").unwrap();
        re.captures(url.path())
            .and_then(|caps| caps.get(1))
            .map(|id| RecordKey::new(id.as_str()))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let url = format!(
            "{}/catalog/{}/raw",
            self.endpoint.base.trim_end_matches('/'),
            key.as_str()
        );
        let value: Value = self.http.get_json(&url)?;
        let record = match value.get("response") {
            Some(response) => response["docs"]
                .as_array()
                .and_then(|docs| docs.first())
                .cloned()
                .ok_or_else(|| GeoextentError::NotFound(url.clone()))?,
            None => value,
        };
        if !record.is_object() {
            return Err(GeoextentError::NotFound(url));
        }
        let mut doc = parse_record(&record);
        if let Some(archive) = doc.bulk_archive.as_mut() {
            if archive.name.is_empty() {
                archive.name = format!("{}.zip", key.file_stem());
            }
        }
        Ok(doc)
    }

    fn strategies(&self) -> &'static [Strategy] {
        &[Strategy::BulkArchive]
    }
}

fn first_str<'a>(record: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|field| record[*field].as_str())
}

pub fn parse_record(record: &Value) -> MetadataDocument {
    let mut doc = MetadataDocument {
        title: first_str(record, &["dct_title_s", "dc_title_s"]).map(str::to_string),
        ..Default::default()
    };
    doc.restricted = first_str(record, &["dct_accessRights_s", "dc_rights_s"])
        .is_some_and(|rights| rights.eq_ignore_ascii_case("restricted"));

    if let Some(envelope) = first_str(record, &["locn_geometry", "solr_geom"]) {
        if let Some(extent) = parse_envelope(envelope) {
            doc.push_geometry(extent);
        }
    }

    for value in record["dct_temporal_sm"].as_array().into_iter().flatten() {
        if let Some(text) = value.as_str() {
            if let Some((start, end)) = parse_year_range(text) {
                doc.push_temporal(TemporalExtent::parse(Some(&start), Some(&end)));
            }
        }
    }
    if doc.temporals.is_empty() {
        let years: Vec<i64> = record["gbl_indexYear_im"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_i64)
            .chain(record["solr_year_i"].as_i64())
            .collect();
        if let (Some(min), Some(max)) = (years.iter().min(), years.iter().max()) {
            doc.push_temporal(TemporalExtent::parse(
                Some(&min.to_string()),
                Some(&format!("{max}-12-31")),
            ));
        }
    }

    for place in record["dct_spatial_sm"].as_array().into_iter().flatten() {
        if let Some(place) = place.as_str() {
            doc.place_names.push(place.to_string());
        }
    }

    doc.bulk_archive = download_url(record).map(|url| {
        let name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| name.contains('.'))
            .unwrap_or_default()
            .to_string();
        CandidateFile::from_metadata(name, url, 0)
    });
    doc
}

/// Solr `ENVELOPE(minX, maxX, maxY, minY)`.
fn parse_envelope(value: &str) -> Option<Result<GeometryExtent, GeoextentError>> {
    let re = Regex::new(r"(?i)^\s*ENVELOPE\s*\(([^)]*)\)\s*$").unwrap();
    let inner = re.captures(value)?.get(1)?.as_str();
    let numbers: Vec<f64> = inner
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match numbers.as_slice() {
        &[west, east, north, south] => Some(GeometryExtent::new(west, south, east, north)),
        _ => None,
    }
}

/// `2005`, `2005-2006` or `2005 - 2006` as whole calendar years.
fn parse_year_range(value: &str) -> Option<(String, String)> {
    let re = Regex::new(r"^\s*(\d{4})(?:\s*[-/]\s*(\d{4}))?\s*$").unwrap();
    let caps = re.captures(value)?;
    let start = caps.get(1)?.as_str();
    let end = caps.get(2).map_or(start, |end| end.as_str());
    Some((format!("{start}-01-01"), format!("{end}-12-31")))
}

fn download_url(record: &Value) -> Option<String> {
    let references: Value = serde_json::from_str(record["dct_references_s"].as_str()?).ok()?;
    match &references[DOWNLOAD_URL_KEY] {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|item| {
            item.as_str()
                .map(str::to_string)
                .or_else(|| item["url"].as_str().map(str::to_string))
        }),
        _ => None,
    }
}
