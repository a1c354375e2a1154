mod common;

use assert_matches::assert_matches;
use serde_json::json;
use url::Url;

use common::{FixtureServer, settings_for};
use kira_geoextent::config::{CswEndpoint, DspaceEndpoint, Settings};
use kira_geoextent::error::GeoextentError;
use kira_geoextent::http::HttpClient;
use kira_geoextent::resolver::Registry;

const UUID: &str = "0f7a2c3e-1b4d-4e5f-8a9b-112233445566";

fn registry(settings: &Settings) -> Registry {
    Registry::from_settings(settings, &HttpClient::new(settings).unwrap())
}

/// Settings whose UUID-probing adapters all point at the fixture.
fn probing_settings(server: &FixtureServer) -> Settings {
    let mut settings = settings_for(server);
    settings.endpoints.dspace = vec![DspaceEndpoint {
        host: "repository.invalid".to_string(),
        api: server.url("/server/api"),
    }];
    settings.endpoints.csw = vec![CswEndpoint {
        host: "catalogue.invalid".to_string(),
        csw_url: server.url("/csw"),
    }];
    settings
}

fn csw_target(server: &FixtureServer, id: &str) -> String {
    let mut url = Url::parse(&server.url("/csw")).unwrap();
    url.query_pairs_mut()
        .append_pair("service", "CSW")
        .append_pair("version", "2.0.2")
        .append_pair("request", "GetRecordById")
        .append_pair("id", id)
        .append_pair("outputSchema", "http://www.isotc211.org/2005/gmd")
        .append_pair("elementSetName", "full");
    format!("{}?{}", url.path(), url.query().unwrap_or_default())
}

#[test]
fn landing_url_claim_binds_key_without_network() {
    let server = FixtureServer::start();
    let adapter = registry(&settings_for(&server))
        .resolve(&server.url("/records/77"))
        .unwrap();
    assert_eq!(adapter.name(), "zenodo");
    assert_eq!(adapter.record_key().unwrap().as_str(), "77");
    assert!(!adapter.metadata_loaded());
}

#[test]
fn foreign_doi_resolves_through_handle_api() {
    let server = FixtureServer::start();
    server.json(
        "/api/handles/10.1234/abc",
        &json!({
            "responseCode": 1,
            "handle": "10.1234/abc",
            "values": [
                {"index": 100, "type": "HS_ADMIN", "data": {"format": "admin", "value": {}}},
                {"index": 1, "type": "URL", "data": {"format": "string", "value": server.url("/records/88")}}
            ]
        }),
    );
    let adapter = registry(&settings_for(&server))
        .resolve("doi:10.1234/ABC")
        .unwrap();
    assert_eq!(adapter.name(), "zenodo");
    assert_eq!(adapter.record_key().unwrap().as_str(), "88");
    assert_eq!(server.hits("/api/handles/10.1234/abc"), 1);
}

#[test]
fn unresolvable_doi_is_validation_error() {
    let server = FixtureServer::start();
    assert_matches!(
        registry(&settings_for(&server)).resolve("10.1234/missing"),
        Err(GeoextentError::Validation(_))
    );
    assert_eq!(server.hits("/api/handles/10.1234/missing"), 1);
}

#[test]
fn two_claimants_are_ambiguous() {
    let server = FixtureServer::start();
    let mut settings = settings_for(&server);
    settings.endpoints.dspace = vec![
        DspaceEndpoint {
            host: server.host(),
            api: server.url("/a/api"),
        },
        DspaceEndpoint {
            host: server.host(),
            api: server.url("/b/api"),
        },
    ];
    let reference = server.url(&format!("/items/{UUID}"));
    assert_matches!(
        registry(&settings).resolve(&reference),
        Err(GeoextentError::AmbiguousReference { .. })
    );
}

#[test]
fn numeric_id_is_confirmed_by_probe() {
    let server = FixtureServer::start();
    server.json("/api/records/12345", &json!({"id": 12345, "metadata": {}}));
    let adapter = registry(&settings_for(&server)).resolve("12345").unwrap();
    assert_eq!(adapter.name(), "zenodo");
    assert_eq!(adapter.record_key().unwrap().as_str(), "12345");
}

#[test]
fn first_confirmed_probe_wins() {
    let server = FixtureServer::start();
    server.json(&format!("/server/api/core/items/{UUID}"), &json!({"uuid": UUID}));
    server.route(
        &csw_target(&server, UUID),
        200,
        "application/xml",
        "<gmd:MD_Metadata xmlns:gmd=\"http://www.isotc211.org/2005/gmd\"></gmd:MD_Metadata>",
    );
    let adapter = registry(&probing_settings(&server)).resolve(UUID).unwrap();
    assert_eq!(adapter.name(), "dspace:repository.invalid");
    assert_eq!(server.hits(&csw_target(&server, UUID)), 0);
}

#[test]
fn csw_probe_requires_a_record() {
    let server = FixtureServer::start();
    let target = csw_target(&server, UUID);
    server.route(&target, 200, "application/xml", "<csw:GetRecordByIdResponse/>");
    assert_matches!(
        registry(&probing_settings(&server)).resolve(UUID),
        Err(GeoextentError::Validation(_))
    );
    assert_eq!(server.hits(&format!("/server/api/core/items/{UUID}")), 1);
    assert_eq!(server.hits(&target), 1);

    server.route(
        &target,
        200,
        "application/xml",
        "<gmd:MD_Metadata xmlns:gmd=\"http://www.isotc211.org/2005/gmd\"></gmd:MD_Metadata>",
    );
    let adapter = registry(&probing_settings(&server)).resolve(UUID).unwrap();
    assert_eq!(adapter.name(), "csw:catalogue.invalid");
}

#[test]
fn probe_errors_fail_closed() {
    let server = FixtureServer::start();
    server.route(&format!("/server/api/core/items/{UUID}"), 500, "text/plain", "boom");
    server.route(&csw_target(&server, UUID), 500, "text/plain", "boom");
    assert_matches!(
        registry(&probing_settings(&server)).resolve(UUID),
        Err(GeoextentError::Validation(_))
    );
}
