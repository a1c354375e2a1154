use regex::Regex;
use serde_json::Value;

use crate::config::ZenodoEndpoint;
use crate::derive::envelope_of_geometry;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::metadata::MetadataDocument;
use crate::providers::{Provider, Strategy};
use crate::resolver::{host_matches, parse_doi, parse_http_url};

/// Zenodo / InvenioRDM records API.
pub struct ZenodoProvider {
    http: HttpClient,
    endpoint: ZenodoEndpoint,
    token: Option<String>,
}

impl ZenodoProvider {
    pub fn new(http: HttpClient, endpoint: ZenodoEndpoint, token: Option<String>) -> Self {
        Self {
            http,
            endpoint,
            token,
        }
    }

    fn api(&self) -> &str {
        self.endpoint.api.trim_end_matches('/')
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/records/{id}", self.api())
    }
}

impl Provider for ZenodoProvider {
    fn name(&self) -> &str {
        "zenodo"
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        if let Some(doi) = parse_doi(reference) {
            if doi.prefix() != self.endpoint.doi_prefix {
                return None;
            }
            let re = Regex::new(r"^zenodo\.(\d+)$").unwrap();
            return re
                .captures(doi.suffix())
                .and_then(|caps| caps.get(1))
                .map(|id| RecordKey::new(id.as_str()));
        }
        let url = parse_http_url(reference)?;
        let api_host = parse_http_url(&self.endpoint.api).and_then(|api| crate::resolver::host_key(&api));
        let known = host_matches(&url, &self.endpoint.hosts)
            || api_host.is_some_and(|host| host_matches(&url, &[host]));
        if !known {
            return None;
        }
        let re = Regex::new(r"^(?:/api)?/records?/(\d+)(?:/|$)").unwrap();
        re.captures(url.path())
            .and_then(|caps| caps.get(1))
            .map(|id| RecordKey::new(id.as_str()))
    }

    fn probe_reference(&self, reference: &str) -> Option<RecordKey> {
        let id = reference.trim();
        if id.is_empty() || !id.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        matches!(self.http.exists(&self.record_url(id)), Ok(true)).then(|| RecordKey::new(id))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let url = self.record_url(key.as_str());
        let response = self.http.get_with_token(&url, self.token.as_deref())?;
        let record: Value = response
            .json()
            .map_err(|err| GeoextentError::Upstream(format!("{url}: {err}")))?;
        if record.get("metadata").is_none() {
            return Err(GeoextentError::NotFound(url));
        }
        let mut doc = parse_record(&record);
        doc.bulk_archive = Some(CandidateFile::from_metadata(
            format!("{}.zip", key.file_stem()),
            format!("{}/files-archive", url),
            0,
        ));
        Ok(doc)
    }

    fn strategies(&self) -> &'static [Strategy] {
        &[Strategy::SelectiveListing, Strategy::BulkArchive]
    }
}

pub fn parse_record(record: &Value) -> MetadataDocument {
    let metadata = &record["metadata"];
    let mut doc = MetadataDocument {
        title: metadata["title"].as_str().map(str::to_string),
        restricted: is_restricted(record),
        ..Default::default()
    };

    match &metadata["locations"] {
        Value::Array(locations) => {
            for location in locations {
                let lat = location["lat"].as_f64();
                let lon = location["lon"].as_f64();
                match (lon, lat) {
                    (Some(lon), Some(lat)) => doc.push_geometry(GeometryExtent::point(lon, lat)),
                    _ => push_place(&mut doc, location["place"].as_str()),
                }
            }
        }
        Value::Object(_) => {
            let features = metadata["locations"]["features"].as_array().cloned().unwrap_or_default();
            for feature in features {
                let geometry = feature
                    .get("geometry")
                    .cloned()
                    .and_then(|geometry| serde_json::from_value::<geojson::Geometry>(geometry).ok())
                    .and_then(|geometry| envelope_of_geometry(&geometry));
                match geometry {
                    Some(extent) => doc.geometries.push(extent),
                    None => push_place(&mut doc, feature["place"].as_str()),
                }
            }
        }
        _ => {}
    }

    for date in metadata["dates"].as_array().into_iter().flatten() {
        if let Some(interval) = date["date"].as_str() {
            let (start, end) = interval.split_once('/').unwrap_or((interval, interval));
            doc.push_temporal(TemporalExtent::parse(non_empty(start), non_empty(end)));
        } else {
            doc.push_temporal(TemporalExtent::parse(date["start"].as_str(), date["end"].as_str()));
        }
    }

    doc.files = parse_files(&record["files"]);
    doc
}

fn push_place(doc: &mut MetadataDocument, place: Option<&str>) {
    if let Some(place) = place.map(str::trim).filter(|place| !place.is_empty()) {
        doc.place_names.push(place.to_string());
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn is_restricted(record: &Value) -> bool {
    if let Some(access_right) = record["metadata"]["access_right"].as_str() {
        return access_right != "open";
    }
    if let Some(files) = record["access"]["files"].as_str() {
        return files != "public";
    }
    false
}

fn parse_files(files: &Value) -> Vec<CandidateFile> {
    let entries: Vec<&Value> = match files {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("entries") {
            Some(Value::Object(entries)) => entries.values().collect(),
            Some(Value::Array(entries)) => entries.iter().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry["key"].as_str().or_else(|| entry["filename"].as_str())?;
            let url = entry["links"]["self"]
                .as_str()
                .or_else(|| entry["links"]["content"].as_str())
                .or_else(|| entry["links"]["download"].as_str())?;
            let size = entry["size"]
                .as_u64()
                .or_else(|| entry["filesize"].as_u64())
                .unwrap_or(0);
            Some(CandidateFile::from_metadata(name, url, size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn provider() -> ZenodoProvider {
        let settings = Settings::default();
        ZenodoProvider::new(
            HttpClient::new(&settings).unwrap(),
            settings.endpoints.zenodo.clone(),
            None,
        )
    }

    #[test]
    fn matches_doi_and_landing_pages() {
        let provider = provider();
        let key = |reference: &str| provider.match_reference(reference).map(|k| k.to_string());
        assert_eq!(key("10.5281/zenodo.820562").as_deref(), Some("820562"));
        assert_eq!(key("https://doi.org/10.5281/ZENODO.820562").as_deref(), Some("820562"));
        assert_eq!(key("https://zenodo.org/records/820562").as_deref(), Some("820562"));
        assert_eq!(key("https://zenodo.org/record/820562/files/a.zip").as_deref(), Some("820562"));
        assert_eq!(key("https://zenodo.org/api/records/820562").as_deref(), Some("820562"));
        assert_eq!(key("https://zenodo.org/communities/x"), None);
        assert_eq!(key("https://example.org/records/820562"), None);
        assert_eq!(key("10.1594/PANGAEA.734969"), None);
        assert_eq!(key("820562"), None);
    }

    #[test]
    fn probe_ignores_non_numeric() {
        assert!(provider().probe_reference("abc").is_none());
    }

    #[test]
    fn parses_legacy_record() {
        let record: Value = serde_json::from_str(
            r#"{
                "id": 820562,
                "metadata": {
                    "title": "Hydrology stations",
                    "access_right": "open",
                    "locations": [
                        {"lat": 21.26, "lon": -157.79, "place": "Honolulu"},
                        {"place": "Oahu"}
                    ],
                    "dates": [{"type": "Collected", "start": "2005-01-01", "end": "2006-01-01"}]
                },
                "files": [
                    {"key": "stations.geojson", "size": 1234, "links": {"self": "https://zenodo.org/api/records/820562/files/stations.geojson/content"}},
                    {"key": "broken"}
                ]
            }"#,
        )
        .unwrap();
        let doc = parse_record(&record);
        assert_eq!(doc.title.as_deref(), Some("Hydrology stations"));
        assert!(!doc.restricted);
        assert_eq!(doc.geometries.len(), 1);
        assert!(doc.geometries[0].is_point());
        assert_eq!(doc.place_names, vec!["Oahu".to_string()]);
        assert_eq!(doc.temporals.len(), 1);
        assert_eq!(doc.files.len(), 1);
        assert_eq!(doc.files[0].size, 1234);
    }

    #[test]
    fn parses_rdm_record() {
        let record: Value = serde_json::from_str(
            r#"{
                "access": {"record": "public", "files": "restricted"},
                "metadata": {
                    "title": "Coast",
                    "locations": {"features": [
                        {"geometry": {"type": "Polygon", "coordinates": [[[9, 53], [11, 53], [11, 55], [9, 55], [9, 53]]]}},
                        {"place": "Baltic Sea"}
                    ]},
                    "dates": [{"date": "2018-04-01/2018-09-30", "type": {"id": "collected"}}]
                },
                "files": {"entries": {"a.tif": {"key": "a.tif", "size": 10, "links": {"content": "https://x/a.tif/content"}}}}
            }"#,
        )
        .unwrap();
        let doc = parse_record(&record);
        assert!(doc.restricted);
        assert_eq!(doc.geometries[0].as_array(), [9.0, 53.0, 11.0, 55.0]);
        assert_eq!(doc.place_names, vec!["Baltic Sea".to_string()]);
        assert_eq!(doc.temporals[0].start.unwrap().to_string(), "2018-04-01");
        assert_eq!(doc.files[0].url, "https://x/a.tif/content");
    }
}
