use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::ExtractionOptions;
use crate::derive::derive_from_files;
use crate::download::{Deadline, DownloadOptions, DownloadedFile, download_batch};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::filter::filter_geospatial;
use crate::fs_util::unpack_in_place;
use crate::geocode::Geocoder;
use crate::http::{FileSource, HttpClient};
use crate::listing::FileEnumerator;
use crate::metadata::MetadataDocument;
use crate::providers::{Adapter, Strategy};
use crate::select::select_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackState {
    MetadataOnly,
    SelectiveListing,
    BulkArchive,
    Done,
    Failed,
}

impl From<Strategy> for FallbackState {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::SelectiveListing => FallbackState::SelectiveListing,
            Strategy::BulkArchive => FallbackState::BulkArchive,
        }
    }
}

impl fmt::Display for FallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FallbackState::MetadataOnly => "metadata-only",
            FallbackState::SelectiveListing => "selective-listing",
            FallbackState::BulkArchive => "bulk-archive",
            FallbackState::Done => "done",
            FallbackState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: FallbackState,
    pub to: FallbackState,
    pub reason: String,
}

/// Everything a chain run needs besides the adapter itself.
pub struct ChainContext<'a> {
    pub http: &'a HttpClient,
    pub source: &'a dyn FileSource,
    pub geocoder: Option<&'a dyn Geocoder>,
    pub options: &'a ExtractionOptions,
    pub download_dir: &'a Path,
    pub deadline: &'a Deadline,
    pub sink: &'a dyn ProgressSink,
}

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// The state whose output the extents come from.
    pub strategy: FallbackState,
    pub title: Option<String>,
    pub geometries: Vec<GeometryExtent>,
    pub temporals: Vec<TemporalExtent>,
    /// True when the geometries were read from downloaded files.
    pub derived: bool,
    pub files: Vec<DownloadedFile>,
    pub transitions: Vec<Transition>,
}

enum Step {
    /// Reported downloads plus the local files they produced after unpacking.
    Downloaded {
        files: Vec<DownloadedFile>,
        local: Vec<PathBuf>,
    },
    Nothing(String),
}

/// Drives one resolved adapter from the cheapest download strategy down to
/// metadata only. Only a metadata failure or an expired deadline is an error.
pub struct FallbackChain {
    state: FallbackState,
    transitions: Vec<Transition>,
}

impl FallbackChain {
    pub fn new(adapter: &Adapter, options: &ExtractionOptions) -> Self {
        let state = match adapter.strategies().first() {
            Some(strategy) if options.download_data => FallbackState::from(*strategy),
            _ => FallbackState::MetadataOnly,
        };
        Self {
            state,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn move_to(&mut self, to: FallbackState, reason: impl Into<String>) {
        let transition = Transition {
            from: self.state,
            to,
            reason: reason.into(),
        };
        info!(
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "fallback transition"
        );
        self.state = to;
        self.transitions.push(transition);
    }

    fn next_after(&self, strategies: &[Strategy]) -> FallbackState {
        strategies
            .iter()
            .map(|strategy| FallbackState::from(*strategy))
            .skip_while(|state| *state != self.state)
            .nth(1)
            .unwrap_or(FallbackState::MetadataOnly)
    }

    pub fn run(
        mut self,
        adapter: &mut Adapter,
        ctx: &ChainContext<'_>,
    ) -> Result<ChainOutcome, GeoextentError> {
        ctx.deadline.check()?;
        let doc = match adapter.metadata() {
            Ok(doc) => doc.clone(),
            Err(err @ GeoextentError::Timeout(_)) => return Err(err),
            Err(err) => {
                self.move_to(FallbackState::Failed, format!("metadata unavailable: {err}"));
                return Err(err);
            }
        };
        ctx.sink.event(ProgressEvent {
            message: format!(
                "metadata for {}: {} geometries, {} temporal ranges",
                adapter.name(),
                doc.geometries.len(),
                doc.temporals.len()
            ),
            elapsed: Some(ctx.deadline.elapsed()),
        });

        if self.state != FallbackState::MetadataOnly && doc.restricted {
            self.move_to(FallbackState::MetadataOnly, "record is access-restricted");
        }

        let strategies = adapter.strategies();
        let mut files = Vec::new();
        let mut local = Vec::new();
        let mut strategy = FallbackState::MetadataOnly;
        loop {
            match self.state {
                FallbackState::SelectiveListing | FallbackState::BulkArchive => {
                    let current = self.state;
                    let step = match current {
                        FallbackState::SelectiveListing => selective_listing(adapter, ctx),
                        _ => bulk_archive(&doc, ctx),
                    };
                    match step {
                        Ok(Step::Downloaded {
                            files: downloaded,
                            local: produced,
                        }) => {
                            let reason = format!("downloaded {} files", downloaded.len());
                            files = downloaded;
                            local = produced;
                            strategy = current;
                            self.move_to(FallbackState::Done, reason);
                        }
                        Ok(Step::Nothing(reason)) => {
                            let next = self.next_after(strategies);
                            self.move_to(next, reason);
                        }
                        Err(err @ GeoextentError::Timeout(_)) => return Err(err),
                        Err(err) if err.is_restricted() => {
                            self.move_to(FallbackState::MetadataOnly, err.to_string());
                        }
                        Err(err) => {
                            let next = self.next_after(strategies);
                            self.move_to(next, err.to_string());
                        }
                    }
                }
                FallbackState::MetadataOnly => {
                    strategy = FallbackState::MetadataOnly;
                    self.move_to(FallbackState::Done, "using metadata extents");
                }
                FallbackState::Done | FallbackState::Failed => break,
            }
        }

        let derived = derive_from_files(&local);
        let (geometries, from_files) = if derived.is_empty() {
            (metadata_geometries(&doc, ctx), false)
        } else {
            (derived, true)
        };

        Ok(ChainOutcome {
            strategy,
            title: doc.title,
            geometries,
            temporals: doc.temporals,
            derived: from_files,
            files,
            transitions: self.transitions,
        })
    }
}

fn download_options(options: &ExtractionOptions) -> DownloadOptions {
    DownloadOptions {
        max_workers: options.max_download_workers,
        max_bytes: options.max_size_bytes,
    }
}

fn selective_listing(adapter: &mut Adapter, ctx: &ChainContext<'_>) -> Result<Step, GeoextentError> {
    let options = ctx.options;
    let listed = adapter.list_files(&FileEnumerator::new(ctx.http))?;
    if listed.is_empty() {
        return Ok(Step::Nothing("no files listed".to_string()));
    }
    let relevant = filter_geospatial(
        listed,
        options.download_skip_nogeo,
        &options.download_skip_nogeo_exts,
    );
    if relevant.is_empty() {
        return Ok(Step::Nothing("no geospatial files after filtering".to_string()));
    }
    let selection = select_files(
        relevant,
        options.max_size_bytes,
        options.max_download_method,
        options.max_download_method_seed,
    );
    if selection.is_empty() {
        return Ok(Step::Nothing(format!(
            "no file fits within {} bytes",
            options.max_size_bytes.unwrap_or(0)
        )));
    }
    ctx.sink.event(ProgressEvent {
        message: format!(
            "selected {} files ({} bytes), skipped {}",
            selection.selected.len(),
            selection.total_bytes,
            selection.skipped.len()
        ),
        elapsed: Some(ctx.deadline.elapsed()),
    });

    let report = download_batch(
        ctx.source,
        &selection.selected,
        ctx.download_dir,
        &download_options(options),
        ctx.deadline,
        ctx.sink,
    )?;
    if report.downloaded.is_empty() {
        return Ok(Step::Nothing(format!(
            "all {} downloads failed",
            report.failed.len()
        )));
    }
    let mut files = Vec::with_capacity(report.downloaded.len());
    let mut local = Vec::new();
    for file in report.downloaded {
        match unpack_in_place(&file.path) {
            Ok(unpacked) => {
                local.extend(unpacked.files);
                files.push(DownloadedFile {
                    path: unpacked.location,
                    ..file
                });
            }
            Err(err) => {
                warn!(file = %file.name, error = %err, "unpack failed, keeping archive as downloaded");
                local.push(file.path.clone());
                files.push(file);
            }
        }
    }
    Ok(Step::Downloaded { files, local })
}

fn bulk_archive(doc: &MetadataDocument, ctx: &ChainContext<'_>) -> Result<Step, GeoextentError> {
    let Some(archive) = doc.bulk_archive.clone() else {
        return Ok(Step::Nothing("no bulk archive offered".to_string()));
    };
    if let Some(limit) = ctx.options.max_size_bytes {
        if archive.size_known() && archive.size > limit {
            return Ok(Step::Nothing(format!(
                "archive of {} bytes exceeds limit of {limit} bytes",
                archive.size
            )));
        }
    }
    let report = download_batch(
        ctx.source,
        std::slice::from_ref(&archive),
        ctx.download_dir,
        &download_options(ctx.options),
        ctx.deadline,
        ctx.sink,
    )?;
    if let Some(failed) = report.failed.first() {
        return Ok(Step::Nothing(format!("archive download failed: {}", failed.error)));
    }
    let mut files = Vec::with_capacity(report.downloaded.len());
    let mut local = Vec::new();
    for file in report.downloaded {
        let unpacked = unpack_in_place(&file.path)?;
        local.extend(unpacked.files);
        files.push(DownloadedFile {
            path: unpacked.location,
            ..file
        });
    }
    Ok(Step::Downloaded { files, local })
}

/// Metadata geometries, or geocoded place names when the record has none.
fn metadata_geometries(doc: &MetadataDocument, ctx: &ChainContext<'_>) -> Vec<GeometryExtent> {
    if !doc.geometries.is_empty() {
        return doc.geometries.clone();
    }
    let Some(geocoder) = ctx.geocoder else {
        return Vec::new();
    };
    let mut geometries = Vec::new();
    for place in &doc.place_names {
        match geocoder.geocode(place) {
            Ok(Some(extent)) => {
                debug!(place = %place, "geocoded place name");
                geometries.push(extent);
            }
            Ok(None) => debug!(place = %place, "place name not found"),
            Err(err) => warn!(place = %place, error = %err, "geocoding failed"),
        }
    }
    geometries
}
