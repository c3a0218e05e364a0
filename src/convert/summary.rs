//! End-of-run summary.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use super::LayerConversionResult;

/// Characters of each failure diagnostic shown in the summary.
pub const DIAGNOSTIC_PREVIEW_CHARS: usize = 100;

/// `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Outcome of a whole conversion run.
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub destination: PathBuf,

    /// One entry per dispatched layer, in dispatch order.
    pub results: Vec<LayerConversionResult>,

    pub elapsed: Duration,

    /// Worker count actually used.
    pub workers: usize,

    /// Destination size in bytes, when it exists after the run.
    pub output_size: Option<u64>,
}

impl ConversionReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &LayerConversionResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// At least one layer converted.
    pub fn success(&self) -> bool {
        self.succeeded() > 0
    }

    pub fn log_summary(&self) {
        info!("Conversion summary");
        info!(elapsed = %format_elapsed(self.elapsed), "Total time");
        info!("Layers converted: {}/{}", self.succeeded(), self.total());

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            warn!("Failed layers: {}", failures.len());
            for failure in failures {
                warn!("  - {}: {}", failure.layer, preview(&failure.diagnostic));
            }
        }

        match (self.success(), self.output_size) {
            (true, Some(size)) => info!(
                "Created {} ({:.2} MB)",
                self.destination.display(),
                size as f64 / (1024.0 * 1024.0)
            ),
            (true, None) => info!("Created {}", self.destination.display()),
            (false, _) => error!("No layer was converted"),
        }
    }
}

/// First characters of a diagnostic, on char boundaries.
pub fn preview(diagnostic: &str) -> String {
    diagnostic.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect()
}
