use serde_json::Value;
use url::Url;

use crate::error::GeoextentError;
use crate::extent::GeometryExtent;
use crate::http::HttpClient;

pub const NOMINATIM_BASE: &str = "https://nominatim.openstreetmap.org";
pub const PHOTON_BASE: &str = "https://photon.komoot.io";

/// Turns a place name into a bounding box.
pub trait Geocoder {
    fn geocode(&self, place: &str) -> Result<Option<GeometryExtent>, GeoextentError>;
}

pub fn geocoder_for(
    service: &str,
    http: HttpClient,
    base_url: Option<&str>,
) -> Result<Box<dyn Geocoder>, GeoextentError> {
    match service.trim().to_ascii_lowercase().as_str() {
        "nominatim" => Ok(Box::new(NominatimGeocoder {
            http,
            base: base_url.unwrap_or(NOMINATIM_BASE).trim_end_matches('/').to_string(),
        })),
        "photon" => Ok(Box::new(PhotonGeocoder {
            http,
            base: base_url.unwrap_or(PHOTON_BASE).trim_end_matches('/').to_string(),
        })),
        other => Err(GeoextentError::InvalidOption(format!(
            "unknown geocoder service: {other}"
        ))),
    }
}

fn query_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<String, GeoextentError> {
    Url::parse_with_params(&format!("{base}{path}"), params)
        .map(|url| url.to_string())
        .map_err(|err| GeoextentError::InvalidOption(format!("geocoder url {base}: {err}")))
}

pub struct NominatimGeocoder {
    http: HttpClient,
    base: String,
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, place: &str) -> Result<Option<GeometryExtent>, GeoextentError> {
        let url = query_url(
            &self.base,
            "/search",
            &[("q", place), ("format", "jsonv2"), ("limit", "1")],
        )?;
        let results: Value = self.http.get_json(&url)?;
        Ok(results
            .as_array()
            .and_then(|items| items.first())
            .and_then(nominatim_extent))
    }
}

/// `boundingbox` is `[south, north, west, east]` as strings.
fn nominatim_extent(result: &Value) -> Option<GeometryExtent> {
    let bounds: Vec<f64> = result["boundingbox"]
        .as_array()?
        .iter()
        .filter_map(|value| value.as_str().and_then(|text| text.parse().ok()))
        .collect();
    if let &[south, north, west, east] = bounds.as_slice() {
        return GeometryExtent::new(west, south, east, north).ok();
    }
    let lat = result["lat"].as_str()?.parse().ok()?;
    let lon = result["lon"].as_str()?.parse().ok()?;
    GeometryExtent::point(lon, lat).ok()
}

pub struct PhotonGeocoder {
    http: HttpClient,
    base: String,
}

impl Geocoder for PhotonGeocoder {
    fn geocode(&self, place: &str) -> Result<Option<GeometryExtent>, GeoextentError> {
        let url = query_url(&self.base, "/api/", &[("q", place), ("limit", "1")])?;
        let collection: Value = self.http.get_json(&url)?;
        Ok(collection["features"]
            .as_array()
            .and_then(|features| features.first())
            .and_then(photon_extent))
    }
}

/// `properties.extent` is `[west, north, east, south]`; points have none.
fn photon_extent(feature: &Value) -> Option<GeometryExtent> {
    let extent: Vec<f64> = feature["properties"]["extent"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_f64)
        .collect();
    if let &[west, north, east, south] = extent.as_slice() {
        return GeometryExtent::new(west, south, east, north).ok();
    }
    let coordinates = feature["geometry"]["coordinates"].as_array()?;
    let lon = coordinates.first()?.as_f64()?;
    let lat = coordinates.get(1)?.as_f64()?;
    GeometryExtent::point(lon, lat).ok()
}
