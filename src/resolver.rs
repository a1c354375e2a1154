use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::config::Settings;
use crate::domain::{Doi, RecordKey};
use crate::error::GeoextentError;
use crate::http::HttpClient;
use crate::providers::csw::CswProvider;
use crate::providers::doi::DoiResolver;
use crate::providers::dspace::DspaceProvider;
use crate::providers::geoblacklight::GeoBlacklightProvider;
use crate::providers::opendap::OpendapProvider;
use crate::providers::schemaorg::SchemaOrgProvider;
use crate::providers::zenodo::ZenodoProvider;
use crate::providers::{Adapter, Provider};

/// Parses `reference` as an http(s) URL.
pub fn parse_http_url(reference: &str) -> Option<Url> {
    let url = Url::parse(reference.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// `host` or `host:port`, lowercased, as configured endpoints spell it.
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

pub fn host_matches(url: &Url, hosts: &[String]) -> bool {
    let Some(key) = host_key(url) else {
        return false;
    };
    hosts.iter().any(|host| host.eq_ignore_ascii_case(&key))
}

/// Host of an endpoint URL in [`host_key`] form.
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    parse_http_url(endpoint).and_then(|url| host_key(&url))
}

pub fn is_uuid(value: &str) -> bool {
    let re = Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap();
    re.is_match(value.trim())
}

pub fn parse_doi(reference: &str) -> Option<Doi> {
    reference.parse().ok()
}

/// The adapters of one request, in probe order.
pub struct Registry {
    adapters: Vec<Adapter>,
    doi_resolver: Option<DoiResolver>,
}

impl Registry {
    pub fn new(adapters: Vec<Adapter>, doi_resolver: Option<DoiResolver>) -> Self {
        Self {
            adapters,
            doi_resolver,
        }
    }

    pub fn from_settings(settings: &Settings, http: &HttpClient) -> Self {
        let endpoints = &settings.endpoints;
        let mut providers: Vec<Box<dyn Provider>> = vec![
            Box::new(ZenodoProvider::new(
                http.clone(),
                endpoints.zenodo.clone(),
                settings.zenodo_token.clone(),
            )),
            Box::new(SchemaOrgProvider::pangaea(http.clone(), endpoints.pangaea.clone())),
        ];
        for endpoint in &endpoints.dspace {
            providers.push(Box::new(DspaceProvider::new(http.clone(), endpoint.clone())));
        }
        for endpoint in &endpoints.geoblacklight {
            providers.push(Box::new(GeoBlacklightProvider::new(
                http.clone(),
                endpoint.clone(),
            )));
        }
        for endpoint in &endpoints.csw {
            providers.push(Box::new(CswProvider::new(http.clone(), endpoint.clone())));
        }
        for endpoint in &endpoints.opendap {
            providers.push(Box::new(OpendapProvider::new(http.clone(), endpoint.clone())));
        }
        let adapters = providers.into_iter().map(Adapter::new).collect();
        let resolver = DoiResolver::new(http.clone(), endpoints.doi_handle_api.clone());
        Self::new(adapters, Some(resolver))
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| adapter.name().to_string())
            .collect()
    }

    /// Picks the one adapter responsible for `reference` and binds its key.
    pub fn resolve(mut self, reference: &str) -> Result<Adapter, GeoextentError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(GeoextentError::Validation(reference.to_string()));
        }

        if let Some(adapter) = self.take_claimed(reference)? {
            return Ok(adapter);
        }

        if let (Some(doi), Some(resolver)) = (parse_doi(reference), self.doi_resolver.as_ref()) {
            match resolver.landing_url(&doi) {
                Ok(landing) => {
                    if let Some(adapter) = self.take_claimed(&landing)? {
                        return Ok(adapter);
                    }
                    debug!(doi = %doi, landing = %landing, "no adapter claims DOI landing page");
                }
                Err(err) => debug!(doi = %doi, error = %err, "DOI handle lookup failed"),
            }
        }

        let probed = self
            .adapters
            .iter()
            .enumerate()
            .find_map(|(index, adapter)| adapter.probe(reference).map(|key| (index, key)));
        if let Some((index, key)) = probed {
            return self.take_bound(index, key);
        }

        Err(GeoextentError::Validation(reference.to_string()))
    }

    fn take_claimed(&mut self, reference: &str) -> Result<Option<Adapter>, GeoextentError> {
        let claims: Vec<(usize, RecordKey)> = self
            .adapters
            .iter()
            .enumerate()
            .filter_map(|(index, adapter)| adapter.claims(reference).map(|key| (index, key)))
            .collect();
        match claims.len() {
            0 => Ok(None),
            1 => {
                let Some((index, key)) = claims.into_iter().next() else {
                    return Ok(None);
                };
                self.take_bound(index, key).map(Some)
            }
            _ => {
                let providers = claims
                    .iter()
                    .map(|(index, _)| self.adapters[*index].name())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(GeoextentError::AmbiguousReference {
                    reference: reference.to_string(),
                    providers,
                })
            }
        }
    }

    fn take_bound(&mut self, index: usize, key: RecordKey) -> Result<Adapter, GeoextentError> {
        let adapter = self.adapters.swap_remove(index);
        adapter.bind(key)?;
        info!(provider = adapter.name(), key = %adapter.record_key()?, "resolved reference");
        Ok(adapter)
    }
}
