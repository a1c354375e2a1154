use std::cell::OnceCell;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::listing::FileEnumerator;
use crate::metadata::{MetadataCache, MetadataDocument};

pub mod csw;
pub mod doi;
pub mod dspace;
pub mod geoblacklight;
pub mod opendap;
pub mod schemaorg;
pub mod zenodo;

/// Ways a repository can hand out data files, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    SelectiveListing,
    BulkArchive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SelectiveListing => write!(f, "selective-listing"),
            Strategy::BulkArchive => write!(f, "bulk-archive"),
        }
    }
}

/// One repository family. Implementations are stateless; per-request state
/// lives in [`Adapter`].
pub trait Provider: Send {
    fn name(&self) -> &str;

    /// DOI or landing-page match. Must not touch the network.
    fn match_reference(&self, reference: &str) -> Option<RecordKey>;

    /// Bare identifiers need the upstream to confirm them. Any failure means
    /// "not mine".
    fn probe_reference(&self, _reference: &str) -> Option<RecordKey> {
        None
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError>;

    fn strategies(&self) -> &'static [Strategy] {
        &[Strategy::SelectiveListing]
    }

    fn enumerate_files(
        &self,
        doc: &MetadataDocument,
        enumerator: &FileEnumerator<'_>,
    ) -> Result<Vec<CandidateFile>, GeoextentError> {
        enumerator.list_files(doc)
    }
}

/// A provider bound to one request: the record key is written once and the
/// metadata document is fetched at most once.
pub struct Adapter {
    provider: Box<dyn Provider>,
    key: OnceCell<RecordKey>,
    metadata: MetadataCache,
}

impl Adapter {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            key: OnceCell::new(),
            metadata: MetadataCache::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn claims(&self, reference: &str) -> Option<RecordKey> {
        self.provider.match_reference(reference)
    }

    pub fn probe(&self, reference: &str) -> Option<RecordKey> {
        self.provider.probe_reference(reference)
    }

    /// Tries the literal forms first and the probing form last, binding the
    /// key on success. Never errors.
    pub fn validate(&self, reference: &str) -> bool {
        let reference = reference.trim();
        let key = self
            .claims(reference)
            .or_else(|| self.probe(reference));
        match key {
            Some(key) => self.bind(key).is_ok(),
            None => false,
        }
    }

    pub fn bind(&self, key: RecordKey) -> Result<(), GeoextentError> {
        if let Some(bound) = self.key.get() {
            if *bound == key {
                return Ok(());
            }
            return Err(GeoextentError::AlreadyBound {
                provider: self.name().to_string(),
                key: bound.to_string(),
            });
        }
        debug!(provider = self.name(), key = %key, "bound record key");
        let _ = self.key.set(key);
        Ok(())
    }

    pub fn record_key(&self) -> Result<&RecordKey, GeoextentError> {
        self.key
            .get()
            .ok_or_else(|| GeoextentError::Unresolved(self.name().to_string()))
    }

    pub fn metadata_loaded(&self) -> bool {
        self.metadata.is_loaded()
    }

    pub fn metadata(&mut self) -> Result<&MetadataDocument, GeoextentError> {
        let key = self
            .key
            .get()
            .ok_or_else(|| GeoextentError::Unresolved(self.provider.name().to_string()))?;
        let provider = &self.provider;
        self.metadata.ensure_loaded(|| {
            info!(provider = provider.name(), key = %key, "fetching metadata");
            provider.fetch_metadata(key)
        })
    }

    pub fn list_files(
        &mut self,
        enumerator: &FileEnumerator<'_>,
    ) -> Result<Vec<CandidateFile>, GeoextentError> {
        self.metadata()?;
        let Some(doc) = self.metadata.get() else {
            return Err(GeoextentError::Unresolved(self.name().to_string()));
        };
        self.provider.enumerate_files(doc, enumerator)
    }

    pub fn strategies(&self) -> &'static [Strategy] {
        self.provider.strategies()
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("provider", &self.provider.name())
            .field("key", &self.key.get())
            .field("metadata_loaded", &self.metadata.is_loaded())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    /// Provider double that counts metadata fetches.
    pub(crate) struct StaticProvider {
        pub name: &'static str,
        pub prefix: &'static str,
        pub probe_ok: bool,
        pub doc: MetadataDocument,
        pub strategies: &'static [Strategy],
        pub fetches: Arc<AtomicUsize>,
    }

    impl StaticProvider {
        pub(crate) fn new(name: &'static str, prefix: &'static str) -> Self {
            Self {
                name,
                prefix,
                probe_ok: false,
                doc: MetadataDocument::default(),
                strategies: &[Strategy::SelectiveListing],
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Provider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn match_reference(&self, reference: &str) -> Option<RecordKey> {
            reference.strip_prefix(self.prefix).map(RecordKey::new)
        }

        fn probe_reference(&self, reference: &str) -> Option<RecordKey> {
            self.probe_ok.then(|| RecordKey::new(reference))
        }

        fn fetch_metadata(&self, _key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.doc.clone())
        }

        fn strategies(&self) -> &'static [Strategy] {
            self.strategies
        }
    }

    #[test]
    fn key_is_write_once() {
        let adapter = Adapter::new(Box::new(StaticProvider::new("a", "a:")));
        assert_matches!(adapter.record_key(), Err(GeoextentError::Unresolved(_)));
        assert!(adapter.validate("a:1"));
        assert_eq!(adapter.record_key().unwrap().as_str(), "1");
        assert!(adapter.bind(RecordKey::new("1")).is_ok());
        assert_matches!(
            adapter.bind(RecordKey::new("2")),
            Err(GeoextentError::AlreadyBound { .. })
        );
        assert!(!adapter.validate("a:2"));
        assert_eq!(adapter.record_key().unwrap().as_str(), "1");
    }

    #[test]
    fn metadata_is_fetched_once() {
        let provider = StaticProvider::new("a", "a:");
        let fetches = provider.fetches.clone();
        let mut adapter = Adapter::new(Box::new(provider));
        assert_matches!(adapter.metadata(), Err(GeoextentError::Unresolved(_)));
        adapter.bind(RecordKey::new("7")).unwrap();
        adapter.metadata().unwrap();
        adapter.metadata().unwrap();
        assert!(adapter.metadata_loaded());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmatched_reference_is_false() {
        let adapter = Adapter::new(Box::new(StaticProvider::new("a", "a:")));
        assert!(!adapter.validate("b:1"));
        assert!(adapter.record_key().is_err());
    }
}
