use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::DownloadMethod;
use crate::error::GeoextentError;

pub const CONFIG_FILE_NAME: &str = "kira-ge.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub min_request_interval_ms: u64,
    pub geocoder: GeocoderSettings,
    pub endpoints: Endpoints,
    #[serde(skip_serializing)]
    pub zenodo_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: format!("kira-ge/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
            connect_timeout_secs: 15,
            max_retries: 3,
            retry_base_delay_ms: 200,
            min_request_interval_ms: 0,
            geocoder: GeocoderSettings::default(),
            endpoints: Endpoints::default(),
            zenodo_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeocoderSettings {
    pub enabled: bool,
    pub service: String,
    pub base_url: Option<String>,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service: "nominatim".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    pub doi_handle_api: String,
    pub zenodo: ZenodoEndpoint,
    pub pangaea: SchemaOrgEndpoint,
    pub dspace: Vec<DspaceEndpoint>,
    pub geoblacklight: Vec<GeoBlacklightEndpoint>,
    pub csw: Vec<CswEndpoint>,
    pub opendap: Vec<OpendapEndpoint>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            doi_handle_api: "https://doi.org/api/handles".to_string(),
            zenodo: ZenodoEndpoint::default(),
            pangaea: SchemaOrgEndpoint::default(),
            dspace: vec![DspaceEndpoint {
                host: "opara.zih.tu-dresden.de".to_string(),
                api: "https://opara.zih.tu-dresden.de/server/api".to_string(),
            }],
            geoblacklight: vec![GeoBlacklightEndpoint {
                host: "geodata.mit.edu".to_string(),
                base: "https://geodata.mit.edu".to_string(),
            }],
            csw: vec![CswEndpoint {
                host: "gdk.gdi-de.org".to_string(),
                csw_url: "https://gdk.gdi-de.org/gdi-de/srv/eng/csw".to_string(),
            }],
            opendap: vec![OpendapEndpoint {
                host: "test.opendap.org".to_string(),
                base: "http://test.opendap.org".to_string(),
                path_prefix: "/opendap/".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ZenodoEndpoint {
    pub api: String,
    pub hosts: Vec<String>,
    pub doi_prefix: String,
}

impl Default for ZenodoEndpoint {
    fn default() -> Self {
        Self {
            api: "https://zenodo.org/api".to_string(),
            hosts: vec!["zenodo.org".to_string(), "www.zenodo.org".to_string()],
            doi_prefix: "10.5281".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaOrgEndpoint {
    pub landing_base: String,
    pub hosts: Vec<String>,
    pub doi_prefix: String,
    pub doi_suffix_label: String,
}

impl Default for SchemaOrgEndpoint {
    fn default() -> Self {
        Self {
            landing_base: "https://doi.pangaea.de/10.1594/PANGAEA.".to_string(),
            hosts: vec!["doi.pangaea.de".to_string(), "www.pangaea.de".to_string()],
            doi_prefix: "10.1594".to_string(),
            doi_suffix_label: "pangaea".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DspaceEndpoint {
    pub host: String,
    pub api: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoBlacklightEndpoint {
    pub host: String,
    pub base: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CswEndpoint {
    pub host: String,
    pub csw_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpendapEndpoint {
    pub host: String,
    pub base: String,
    pub path_prefix: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, GeoextentError> {
        let mut settings = match Self::locate(path)? {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| GeoextentError::ConfigRead(config_path.clone()))?;
                Self::parse(&content)?
            }
            None => Settings::default(),
        };
        Self::apply_env(&mut settings, |name| std::env::var(name).ok());
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Settings, GeoextentError> {
        serde_json::from_str(content).map_err(|err| GeoextentError::ConfigParse(err.to_string()))
    }

    fn locate(path: Option<&str>) -> Result<Option<PathBuf>, GeoextentError> {
        if let Some(path) = path {
            let explicit = PathBuf::from(path);
            if !explicit.exists() {
                return Err(GeoextentError::ConfigRead(explicit));
            }
            return Ok(Some(explicit));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }
        let user = ProjectDirs::from("org", "kira", "kira-ge")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists());
        Ok(user)
    }

    pub fn apply_env<F>(settings: &mut Settings, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = lookup("KIRA_GE_USER_AGENT") {
            settings.user_agent = value.trim().to_string();
        }
        if let Some(value) = lookup("KIRA_GE_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            settings.timeout_secs = value;
        }
        if let Some(value) = lookup("KIRA_GE_MAX_RETRIES").and_then(|v| v.trim().parse().ok()) {
            settings.max_retries = value;
        }
        if let Some(value) = lookup("KIRA_GE_GEOCODER") {
            settings.geocoder.enabled = true;
            settings.geocoder.service = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("ZENODO_ACCESS_TOKEN") {
            settings.zenodo_token = Some(value.trim().to_string());
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub download_data: bool,
    pub max_size_bytes: Option<u64>,
    pub max_download_method: DownloadMethod,
    pub max_download_method_seed: u64,
    pub download_skip_nogeo: bool,
    pub download_skip_nogeo_exts: BTreeSet<String>,
    pub max_download_workers: usize,
    pub convex_hull: bool,
    pub timeout: Option<Duration>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            download_data: false,
            max_size_bytes: None,
            max_download_method: DownloadMethod::Ordered,
            max_download_method_seed: 42,
            download_skip_nogeo: false,
            download_skip_nogeo_exts: BTreeSet::new(),
            max_download_workers: 4,
            convex_hull: false,
            timeout: None,
        }
    }
}

/// Parses a user-supplied size limit. `K`/`KB`/`M`/`MB`... are decimal,
/// `KiB`/`MiB`... are binary, a bare number is bytes.
pub fn parse_size_limit(value: &str) -> Result<u64, GeoextentError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| GeoextentError::InvalidOption(format!("invalid size: {value}")))?;
    let unit = unit.trim().to_ascii_lowercase();
    let (prefix, binary) = match unit.strip_suffix("ib") {
        Some(prefix) => (prefix.to_string(), true),
        None => (unit.trim_end_matches('b').to_string(), false),
    };
    let power = match prefix.as_str() {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        _ => {
            return Err(GeoextentError::InvalidOption(format!(
                "unknown size unit in {value}"
            )));
        }
    };
    if binary && power == 0 {
        return Err(GeoextentError::InvalidOption(format!(
            "unknown size unit in {value}"
        )));
    }
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    Ok((number * base.powi(power)) as u64)
}
