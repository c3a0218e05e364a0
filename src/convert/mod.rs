//! Layer-by-layer conversion under the single-writer rule.
//!
//! Every layer is converted by a separate converter process writing into
//! the same destination file. SQLite does not support concurrent writers
//! from several processes, so as soon as more than one layer targets the
//! destination the run is sequential, whatever worker count was requested.

pub mod command;
#[cfg(feature = "gdal")]
pub mod in_process;
pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::ConvertOptions;
use crate::error::ConvertError;
use crate::metadata::MetadataResolver;
use crate::overlay::{OverlayOutcome, OverlayStore};
use crate::source::{LayerInfo, SourceContainer};

pub use command::{LayerRunner, Ogr2OgrRunner};
#[cfg(feature = "gdal")]
pub use in_process::GdalRunner;
pub use summary::{format_elapsed, ConversionReport};

/// Destination extensions recognized as Spatialite files.
const SPATIALITE_EXTENSIONS: &[&str] = &["sqlite", "db"];

/// How a converter run opens the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the destination file.
    Create,
    /// Add a table to an existing destination file.
    Append,
}

/// One layer to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerJob {
    pub layer: String,
    pub mode: WriteMode,

    /// Replace the destination when creating it.
    pub overwrite: bool,
}

impl LayerJob {
    pub fn new(layer: impl Into<String>, mode: WriteMode, overwrite: bool) -> Self {
        Self {
            layer: layer.into(),
            mode,
            overwrite,
        }
    }
}

/// Result of converting one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerConversionResult {
    pub layer: String,
    pub success: bool,

    /// Failure diagnostic (last converter output lines), empty on success.
    pub diagnostic: String,

    /// Converter output lines captured.
    pub output_lines: usize,

    pub elapsed: Duration,

    /// Metadata application outcome, when post-processing ran.
    pub metadata: Option<OverlayOutcome>,
}

impl LayerConversionResult {
    pub fn failed(layer: &str, diagnostic: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            layer: layer.to_string(),
            success: false,
            diagnostic: diagnostic.into(),
            elapsed,
            ..Default::default()
        }
    }
}

/// Worker count allowed for `layers` jobs.
///
/// Collapses to 1 whenever more than one job shares a destination.
pub fn effective_concurrency(requested: usize, layers: usize, shared_destination: bool) -> usize {
    if layers > 1 && shared_destination {
        return 1;
    }
    requested.clamp(1, layers.max(1))
}

/// Check that `path` is an existing source container directory.
pub async fn validate_source(path: &Path) -> Result<(), ConvertError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| ConvertError::SourceMissing(path.to_path_buf()))?;
    if !metadata.is_dir() {
        return Err(ConvertError::SourceNotDirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Converts the layers of one source container into one destination file.
pub struct Converter {
    source: Arc<dyn SourceContainer>,
    destination: PathBuf,
    runner: Arc<dyn LayerRunner>,
    fallback: Option<Arc<dyn LayerRunner>>,
    resolver: MetadataResolver,
    overlay: OverlayStore,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(
        source: Arc<dyn SourceContainer>,
        destination: impl Into<PathBuf>,
        runner: Arc<dyn LayerRunner>,
        options: ConvertOptions,
    ) -> Self {
        let destination = destination.into();
        Self {
            resolver: MetadataResolver::new(source.clone()),
            overlay: OverlayStore::new(&destination),
            source,
            destination,
            runner,
            fallback: None,
            options,
        }
    }

    /// Runner used instead when the primary one is unavailable.
    pub fn with_fallback(mut self, fallback: Arc<dyn LayerRunner>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Replace the metadata resolver (custom locator thresholds or parser).
    pub fn with_resolver(mut self, resolver: MetadataResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Check the source and destination paths.
    ///
    /// Creates the destination's parent directory when missing.
    pub async fn validate(&self) -> Result<(), ConvertError> {
        let source = self.source.path();
        debug!(source = %source.display(), destination = %self.destination.display(), "Validating paths");
        validate_source(source).await?;

        if let Some(parent) = self.destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let extension = self
            .destination
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        if !SPATIALITE_EXTENSIONS.contains(&extension) {
            warn!(
                extension,
                "Unusual extension for a Spatialite file, .sqlite or .db recommended"
            );
        }

        if self.destination_exists().await && !self.options.overwrite {
            return Err(ConvertError::DestinationExists(self.destination.clone()));
        }
        Ok(())
    }

    /// Layers selected by the options, with their summary information.
    pub async fn layers_to_convert(&self) -> Result<Vec<LayerInfo>, ConvertError> {
        let available = self.source.list_layers().await?;
        info!(layers = available.len(), "Layers found in source");

        let Some(selected) = &self.options.layer else {
            return Ok(available);
        };

        let info = available
            .into_iter()
            .find(|layer| &layer.name == selected)
            .unwrap_or_else(|| {
                warn!(layer = %selected, "Layer not listed by the source, trying it anyway");
                LayerInfo {
                    name: selected.clone(),
                    ..Default::default()
                }
            });
        Ok(vec![info])
    }

    /// Convert every selected layer, then apply metadata and tune the
    /// destination. Only input validation and converter availability are
    /// fatal; per-layer failures are collected in the report.
    pub async fn run(&self) -> Result<ConversionReport, ConvertError> {
        let started = Instant::now();
        info!("Starting conversion");
        info!(source = %self.source.path().display(), "Source");
        info!(destination = %self.destination.display(), "Destination");

        self.validate().await?;

        let runner = self.select_runner().await?;

        let layers = self.layers_to_convert().await?;
        let mut report = ConversionReport {
            destination: self.destination.clone(),
            ..Default::default()
        };
        if layers.is_empty() {
            error!("No layer to convert");
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        info!(layers = layers.len(), "Layers to convert");
        for (i, layer) in layers.iter().enumerate() {
            match layer.feature_count {
                Some(count) => info!("  {}. {}: {} features", i + 1, layer.name, count),
                None => info!("  {}. {}", i + 1, layer.name),
            }
        }

        if self.options.overwrite && self.destination_exists().await {
            info!(destination = %self.destination.display(), "Removing existing destination");
            tokio::fs::remove_file(&self.destination).await?;
        }

        let workers = effective_concurrency(self.options.workers, layers.len(), true);
        if workers < self.options.workers {
            warn!(
                requested = self.options.workers,
                workers,
                "Several layers share one SQLite destination, which does not support concurrent writers; converting sequentially"
            );
        }
        report.workers = workers;
        info!(workers, "Converting layers");

        let total = layers.len();
        let mut results: Vec<(usize, LayerConversionResult)> = stream::iter(layers.iter().enumerate())
            .map(|(i, layer)| async move {
                info!("[{}/{}] Converting '{}'", i + 1, total, layer.name);
                (i, self.convert_layer(runner, &layer.name).await)
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);
        report.results = results.into_iter().map(|(_, result)| result).collect();

        if report.success() {
            if let Err(e) = self.overlay.optimize(self.options.fast_mode).await {
                debug!(error = %e, "Destination tuning failed");
            }
        }

        report.elapsed = started.elapsed();
        report.output_size = tokio::fs::metadata(&self.destination)
            .await
            .ok()
            .map(|m| m.len());
        report.log_summary();

        if !report.success() && self.destination_exists().await {
            debug!(destination = %self.destination.display(), "Removing partial destination");
            if let Err(e) = tokio::fs::remove_file(&self.destination).await {
                warn!(error = %e, "Failed to remove partial destination");
            }
            report.output_size = None;
        }

        Ok(report)
    }

    /// The primary runner when it is available, else the fallback.
    async fn select_runner(&self) -> Result<&dyn LayerRunner, ConvertError> {
        let unavailable = match self.runner.check_available().await {
            Ok(version) => {
                info!(version = %version, "Converter available");
                return Ok(self.runner.as_ref());
            }
            Err(e) => e,
        };
        let Some(fallback) = &self.fallback else {
            return Err(unavailable);
        };

        warn!(error = %unavailable, "Converter unavailable, using the fallback");
        match fallback.check_available().await {
            Ok(version) => {
                info!(version = %version, "Fallback converter available");
                Ok(fallback.as_ref())
            }
            Err(e) => {
                error!(error = %e, "Fallback converter unavailable");
                Err(unavailable)
            }
        }
    }

    async fn convert_layer(&self, runner: &dyn LayerRunner, layer: &str) -> LayerConversionResult {
        // The first layer to reach the destination creates it.
        let mode = if self.destination_exists().await {
            WriteMode::Append
        } else {
            WriteMode::Create
        };
        let job = LayerJob::new(layer, mode, self.options.overwrite);

        let mut result = runner.run(&job).await;
        if result.success && self.options.metadata.any() {
            result.metadata = Some(self.post_process(layer).await);
        }
        result
    }

    async fn post_process(&self, layer: &str) -> OverlayOutcome {
        if !self.destination_exists().await {
            warn!(layer, "Destination missing after conversion, metadata not applied");
            return OverlayOutcome::default();
        }

        info!(layer, "Applying metadata");
        let metadata = self.resolver.extract(layer, self.options.metadata).await;
        let outcome = self.overlay.apply_layer(layer, &metadata).await;

        if outcome.success() {
            info!(layer, "Metadata applied");
        } else {
            warn!(layer, "Some metadata could not be applied");
        }
        outcome
    }

    async fn destination_exists(&self) -> bool {
        tokio::fs::try_exists(&self.destination)
            .await
            .unwrap_or(false)
    }
}
