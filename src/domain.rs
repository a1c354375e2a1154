use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GeoextentError;

const DOI_URL_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.split_once('/').map(|(prefix, _)| prefix).unwrap_or("")
    }

    pub fn suffix(&self) -> &str {
        self.0.split_once('/').map(|(_, suffix)| suffix).unwrap_or("")
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = GeoextentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut trimmed = value.trim();
        for prefix in DOI_URL_PREFIXES {
            let head = trimmed.get(..prefix.len()).unwrap_or("");
            if head.eq_ignore_ascii_case(prefix) {
                trimmed = &trimmed[prefix.len()..];
                break;
            }
        }
        let valid = trimmed.starts_with("10.")
            && trimmed
                .split_once('/')
                .map(|(registrant, suffix)| {
                    registrant.len() > 3
                        && registrant[3..].chars().all(|ch| ch.is_ascii_digit() || ch == '.')
                        && !suffix.is_empty()
                        && !suffix.chars().any(char::is_whitespace)
                })
                .unwrap_or(false);
        if !valid {
            return Err(GeoextentError::Validation(value.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }
}

/// Repository-specific record identifier. Once an adapter binds one it is
/// never replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
                    ch
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileOrigin {
    Metadata,
    DirectoryListing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub name: String,
    pub url: String,
    /// Size in bytes; 0 when the upstream did not say.
    pub size: u64,
    pub origin: FileOrigin,
}

impl CandidateFile {
    pub fn from_metadata(name: impl Into<String>, url: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size,
            origin: FileOrigin::Metadata,
        }
    }

    pub fn from_listing(name: impl Into<String>, url: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size,
            origin: FileOrigin::DirectoryListing,
        }
    }

    pub fn extension(&self) -> Option<String> {
        let name = self.name.rsplit('/').next().unwrap_or(&self.name);
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn size_known(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    #[default]
    Ordered,
    Random,
}

impl fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadMethod::Ordered => write!(f, "ordered"),
            DownloadMethod::Random => write!(f, "random"),
        }
    }
}
