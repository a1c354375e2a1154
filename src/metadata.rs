use crate::domain::CandidateFile;
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};

/// Repository metadata translated into the shape every adapter shares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDocument {
    pub title: Option<String>,
    pub geometries: Vec<GeometryExtent>,
    pub temporals: Vec<TemporalExtent>,
    pub files: Vec<CandidateFile>,
    pub listing_url: Option<String>,
    pub bulk_archive: Option<CandidateFile>,
    pub place_names: Vec<String>,
    pub restricted: bool,
}

impl MetadataDocument {
    pub fn has_extent(&self) -> bool {
        !self.geometries.is_empty() || !self.temporals.is_empty()
    }

    pub fn push_geometry(&mut self, extent: Result<GeometryExtent, GeoextentError>) {
        match extent {
            Ok(extent) => self.geometries.push(extent),
            Err(err) => tracing::warn!(error = %err, "dropping invalid geometry from metadata"),
        }
    }

    pub fn push_temporal(&mut self, extent: Result<TemporalExtent, GeoextentError>) {
        match extent {
            Ok(extent) => self.temporals.push(extent),
            Err(err) => tracing::debug!(error = %err, "dropping unusable temporal coverage"),
        }
    }
}

/// One-shot holder for an adapter's metadata document.
#[derive(Debug, Default)]
pub struct MetadataCache {
    document: Option<MetadataDocument>,
}

impl MetadataCache {
    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    pub fn get(&self) -> Option<&MetadataDocument> {
        self.document.as_ref()
    }

    /// Runs `load` only when nothing is cached yet. A failed load leaves the
    /// cache empty.
    pub fn ensure_loaded<F>(&mut self, load: F) -> Result<&MetadataDocument, GeoextentError>
    where
        F: FnOnce() -> Result<MetadataDocument, GeoextentError>,
    {
        let document = match self.document.take() {
            Some(document) => document,
            None => load()?,
        };
        Ok(self.document.insert(document))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn loads_once() {
        let calls = Cell::new(0);
        let mut cache = MetadataCache::default();
        for _ in 0..3 {
            let doc = cache
                .ensure_loaded(|| {
                    calls.set(calls.get() + 1);
                    Ok(MetadataDocument {
                        title: Some("cached".to_string()),
                        ..Default::default()
                    })
                })
                .unwrap();
            assert_eq!(doc.title.as_deref(), Some("cached"));
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failed_load_is_not_cached() {
        let mut cache = MetadataCache::default();
        let result = cache.ensure_loaded(|| Err(GeoextentError::NotFound("x".to_string())));
        assert_matches!(result, Err(GeoextentError::NotFound(_)));
        assert!(!cache.is_loaded());
        cache.ensure_loaded(|| Ok(MetadataDocument::default())).unwrap();
        assert!(cache.is_loaded());
    }

    #[test]
    fn invalid_geometry_is_dropped() {
        let mut doc = MetadataDocument::default();
        doc.push_geometry(GeometryExtent::new(0.0, 0.0, 1.0, 1.0));
        doc.push_geometry(GeometryExtent::new(0.0, 0.0, 500.0, 1.0));
        assert_eq!(doc.geometries.len(), 1);
        assert!(doc.has_extent());
    }
}
