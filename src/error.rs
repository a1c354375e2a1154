use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeoextentError {
    #[error("no supported repository matches reference: {0}")]
    #[diagnostic(help("try a DOI, a landing page URL or `kira-ge providers`"))]
    Validation(String),

    #[error("reference {reference} is claimed by more than one provider: {providers}")]
    AmbiguousReference { reference: String, providers: String },

    #[error("adapter {0} has no resolved record key")]
    Unresolved(String),

    #[error("adapter {provider} is already bound to record {key}")]
    AlreadyBound { provider: String, key: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream returned status {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("size limit of {limit} bytes exceeded by {name}")]
    SizeExceeded { name: String, limit: u64 },

    #[error("record is not publicly accessible: {0}")]
    RestrictedAccess(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid extent: {0}")]
    InvalidExtent(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GeoextentError {
    pub fn is_restricted(&self) -> bool {
        matches!(self, GeoextentError::RestrictedAccess(_))
    }
}
