use camino::Utf8PathBuf;
use regex::Regex;
use serde_json::Value;

use kira_geoextent::app::App;
use kira_geoextent::config::{ExtractionOptions, Settings};
use kira_geoextent::output::{ExtentResult, JsonOutput};

const TOLERANCE_DEG: f64 = 0.5;

fn extract(reference: &str, options: &ExtractionOptions) -> ExtentResult {
    let app = App::new(Settings::default()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    app.extract(reference, options, &target, &JsonOutput).unwrap()
}

fn fetch(url: &str) -> String {
    reqwest::blocking::Client::builder()
        .user_agent("kira-ge-live-tests")
        .build()
        .unwrap()
        .get(url)
        .send()
        .unwrap()
        .error_for_status()
        .unwrap()
        .text()
        .unwrap()
}

/// `[west, south, east, north]` of a set of `(lon, lat)` positions.
fn envelope(points: &[(f64, f64)]) -> Option<[f64; 4]> {
    let (first, rest) = points.split_first()?;
    let mut bbox = [first.0, first.1, first.0, first.1];
    for (lon, lat) in rest {
        bbox = [bbox[0].min(*lon), bbox[1].min(*lat), bbox[2].max(*lon), bbox[3].max(*lat)];
    }
    Some(bbox)
}

fn assert_bbox_close(actual: Option<[f64; 4]>, published: [f64; 4]) {
    let actual = actual.unwrap_or_else(|| panic!("no bbox, published {published:?}"));
    for (got, want) in actual.iter().zip(published) {
        assert!(
            (got - want).abs() <= TOLERANCE_DEG,
            "bbox {actual:?} differs from published {published:?}"
        );
    }
}

/// Point locations as listed in the public Zenodo record JSON.
fn zenodo_published_bbox(id: &str) -> Option<[f64; 4]> {
    let record: Value =
        serde_json::from_str(&fetch(&format!("https://zenodo.org/api/records/{id}"))).unwrap();
    let points: Vec<(f64, f64)> = record["metadata"]["locations"]
        .as_array()
        .map(|locations| {
            locations
                .iter()
                .filter_map(|location| Some((location["lon"].as_f64()?, location["lat"].as_f64()?)))
                .collect()
        })
        .unwrap_or_default();
    envelope(&points)
}

/// Coverage printed in the landing page's JSON-LD: a `box` of
/// "south west north east", or the envelope of its coordinate pairs.
fn pangaea_published_bbox(landing: &str) -> [f64; 4] {
    let html = fetch(landing);
    let number = |text: &str| text.trim_matches('"').parse::<f64>().unwrap();
    if let Some(caps) = Regex::new(r#""box"\s*:\s*"([^"]+)""#).unwrap().captures(&html) {
        let values: Vec<f64> = caps[1].split_whitespace().map(number).collect();
        return [values[1], values[0], values[3], values[2]];
    }
    let pairs = Regex::new(r#""latitude"\s*:\s*("?[-\d.]+"?)\s*,\s*"longitude"\s*:\s*("?[-\d.]+"?)"#)
        .unwrap();
    let points: Vec<(f64, f64)> = pairs
        .captures_iter(&html)
        .map(|caps| (number(&caps[2]), number(&caps[1])))
        .collect();
    envelope(&points).unwrap()
}

#[test]
#[ignore]
fn zenodo_doi_metadata_matches_published_locations() {
    let result = extract("10.5281/zenodo.820562", &ExtractionOptions::default());
    assert_eq!(result.source, "zenodo");
    assert_eq!(result.dataset_id, "820562");
    assert!(result.title.is_some());
    if let Some(published) = zenodo_published_bbox("820562") {
        assert_bbox_close(result.bbox, published);
    }
}

#[test]
#[ignore]
fn pangaea_doi_matches_published_coverage() {
    let result = extract("https://doi.org/10.1594/PANGAEA.734969", &ExtractionOptions::default());
    assert_eq!(result.source, "pangaea");
    assert_bbox_close(
        result.bbox,
        pangaea_published_bbox("https://doi.pangaea.de/10.1594/PANGAEA.734969"),
    );
    let [start, end] = result.tbox.unwrap();
    assert!(start <= end);
}

#[test]
#[ignore]
fn opendap_test_server_with_small_budget() {
    let options = ExtractionOptions {
        download_data: true,
        download_skip_nogeo: true,
        max_size_bytes: Some(2_000_000),
        ..Default::default()
    };
    let result = extract("http://test.opendap.org/opendap/data/nc/contents.html", &options);
    assert!(result.source.starts_with("opendap:"));
    assert!(result.files.iter().map(|file| file.bytes).sum::<u64>() <= 2_000_000);
}
