use serde::Deserialize;
use tracing::debug;

use crate::domain::Doi;
use crate::error::GeoextentError;
use crate::http::HttpClient;

/// Resolves DOIs to landing pages through the doi.org handle API, without
/// following the redirect chain of the landing page itself.
#[derive(Clone)]
pub struct DoiResolver {
    http: HttpClient,
    handle_api: String,
}

#[derive(Debug, Deserialize)]
struct HandleResponse {
    #[serde(rename = "responseCode")]
    response_code: i64,
    #[serde(default)]
    values: Vec<HandleValue>,
}

#[derive(Debug, Deserialize)]
struct HandleValue {
    #[serde(rename = "type")]
    kind: String,
    data: HandleData,
}

#[derive(Debug, Deserialize)]
struct HandleData {
    value: serde_json::Value,
}

impl DoiResolver {
    pub fn new(http: HttpClient, handle_api: impl Into<String>) -> Self {
        Self {
            http,
            handle_api: handle_api.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn landing_url(&self, doi: &Doi) -> Result<String, GeoextentError> {
        let url = format!("{}/{}", self.handle_api, doi.as_str());
        let response: HandleResponse = self.http.get_json(&url)?;
        let landing = landing_from_handle(&response)
            .ok_or_else(|| GeoextentError::NotFound(doi.to_string()))?;
        debug!(doi = %doi, landing = %landing, "resolved DOI through handle API");
        Ok(landing)
    }
}

fn landing_from_handle(response: &HandleResponse) -> Option<String> {
    // 1 = success in the handle protocol
    if response.response_code != 1 {
        return None;
    }
    response
        .values
        .iter()
        .find(|value| value.kind.eq_ignore_ascii_case("URL"))
        .and_then(|value| value.data.value.as_str())
        .map(str::to_string)
}
