use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::config::{ExtractionOptions, Settings};
use crate::download::{Deadline, sanitize_file_name};
use crate::error::GeoextentError;
use crate::extent::{MergeMode, merge};
use crate::fallback::{ChainContext, FallbackChain};
use crate::geocode::geocoder_for;
use crate::http::HttpClient;
use crate::output::{ExtentResult, write_feature};
use crate::resolver::Registry;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives progress from every stage, download workers included.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the log.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResult {
    pub providers: Vec<String>,
}

pub struct App {
    settings: Settings,
    http: HttpClient,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self, GeoextentError> {
        let http = HttpClient::new(&settings)?;
        Ok(Self { settings, http })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn providers(&self) -> ProvidersResult {
        ProvidersResult {
            providers: Registry::from_settings(&self.settings, &self.http).names(),
        }
    }

    /// Resolves `reference`, runs the fallback chain and writes
    /// `<provider>_<key>.geojson` into `target_dir`. Downloads land in a
    /// directory of the same stem.
    pub fn extract(
        &self,
        reference: &str,
        options: &ExtractionOptions,
        target_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ExtentResult, GeoextentError> {
        if options.max_download_workers == 0 {
            return Err(GeoextentError::InvalidOption(
                "download workers must be at least 1".to_string(),
            ));
        }
        let deadline = Deadline::new(options.timeout);

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {reference}"),
            elapsed: None,
        });
        let mut adapter = Registry::from_settings(&self.settings, &self.http).resolve(reference)?;
        deadline.check()?;
        let key = adapter.record_key()?.clone();
        let stem = format!("{}_{}", sanitize_file_name(adapter.name()), key.file_stem());
        info!(provider = adapter.name(), key = %key, "resolved reference");

        let geocoder = if self.settings.geocoder.enabled {
            Some(geocoder_for(
                &self.settings.geocoder.service,
                self.http.clone(),
                self.settings.geocoder.base_url.as_deref(),
            )?)
        } else {
            None
        };

        let download_dir = target_dir.join(&stem);
        let ctx = ChainContext {
            http: &self.http,
            source: &self.http,
            geocoder: geocoder.as_deref(),
            options,
            download_dir: download_dir.as_std_path(),
            deadline: &deadline,
            sink,
        };
        let outcome = FallbackChain::new(&adapter, options).run(&mut adapter, &ctx)?;

        sink.event(ProgressEvent {
            message: format!("phase=Merge; strategy={}", outcome.strategy),
            elapsed: Some(deadline.elapsed()),
        });
        let mode = if options.convex_hull {
            MergeMode::ConvexHull
        } else {
            MergeMode::Bbox
        };
        let merged = merge(&outcome.geometries, &outcome.temporals, mode);
        let mut result =
            ExtentResult::new(adapter.name(), &key, outcome, merged, options.convex_hull);

        let feature_path = target_dir.join(format!("{stem}.geojson"));
        write_feature(feature_path.as_std_path(), &result.to_feature())?;
        result.output = Some(feature_path.to_string());
        Ok(result)
    }
}
