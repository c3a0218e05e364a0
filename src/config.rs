//! Conversion configuration.
//!
//! Option structs for the orchestrator, the metadata switches, the process
//! supervisor and the catalog locator. Every struct has a `Default` matching
//! the CLI defaults plus builder-style setters.

use std::path::PathBuf;
use std::time::Duration;

/// Options for one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Convert only this layer (all layers when `None`).
    pub layer: Option<String>,

    /// Replace an existing destination file.
    pub overwrite: bool,

    /// Requested worker count. Collapsed to 1 whenever several layers share
    /// one destination file.
    pub workers: usize,

    /// Which metadata categories to carry over.
    pub metadata: MetadataOptions,

    /// Aggressive post-run PRAGMAs (no journal, no fsync).
    pub fast_mode: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            layer: None,
            overwrite: false,
            workers: 1,
            metadata: MetadataOptions::default(),
            fast_mode: false,
        }
    }
}

impl ConvertOptions {
    /// Restrict the run to a single layer.
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    /// Set the overwrite flag.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the requested worker count (minimum 1).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the metadata switches.
    pub fn metadata(mut self, metadata: MetadataOptions) -> Self {
        self.metadata = metadata;
        self
    }

    /// Enable or disable aggressive tuning.
    pub fn fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }
}

/// Metadata preservation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataOptions {
    pub aliases: bool,
    pub domains: bool,
    pub primary_keys: bool,
    pub triggers: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            aliases: true,
            domains: true,
            primary_keys: true,
            triggers: true,
        }
    }
}

impl MetadataOptions {
    /// Every category disabled.
    pub fn disabled() -> Self {
        Self {
            aliases: false,
            domains: false,
            primary_keys: false,
            triggers: false,
        }
    }

    /// Build from the CLI switches: the master flag wins over the
    /// individual ones.
    pub fn from_flags(
        no_metadata: bool,
        skip_aliases: bool,
        skip_domains: bool,
        skip_primary_keys: bool,
        skip_triggers: bool,
    ) -> Self {
        if no_metadata {
            return Self::disabled();
        }
        Self {
            aliases: !skip_aliases,
            domains: !skip_domains,
            primary_keys: !skip_primary_keys,
            triggers: !skip_triggers,
        }
    }

    /// True when at least one category is enabled.
    pub fn any(&self) -> bool {
        self.aliases || self.domains || self.primary_keys || self.triggers
    }
}

/// Process supervisor timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// First poll interval.
    pub initial_poll: Duration,

    /// Floor for the poll interval.
    pub min_poll: Duration,

    /// Ceiling for the poll interval.
    pub max_poll: Duration,

    /// Consecutive idle polls tolerated before the interval starts growing.
    pub idle_polls_before_backoff: u32,

    /// Interval between "still converting" status messages.
    pub status_interval: Duration,

    /// Silence after which the process is reported as stalled.
    pub stall_timeout: Duration,

    /// How long to wait for the drain task to signal completion after exit.
    pub drain_wait: Duration,

    /// How long to wait for the drain task to join after the signal.
    pub join_timeout: Duration,

    /// Number of trailing output lines kept as failure diagnostic.
    pub diagnostic_tail: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_poll: Duration::from_millis(100),
            min_poll: Duration::from_millis(100),
            max_poll: Duration::from_secs(1),
            idle_polls_before_backoff: 10,
            status_interval: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(60),
            drain_wait: Duration::from_secs(10),
            join_timeout: Duration::from_secs(2),
            diagnostic_tail: 10,
        }
    }
}

impl SupervisorConfig {
    /// Set the status message interval.
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Set the stall timeout.
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the drain completion wait.
    pub fn drain_wait(mut self, wait: Duration) -> Self {
        self.drain_wait = wait;
        self
    }
}

/// Catalog file discovery thresholds.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Bytes read from each candidate for the quick score.
    pub prefix_bytes: u64,

    /// Files smaller than this are rescanned in full.
    pub full_scan_limit: u64,

    /// A candidate must score strictly above this to be retained.
    pub min_score: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            prefix_bytes: 1024 * 1024,
            full_scan_limit: 10 * 1024 * 1024,
            min_score: 20,
        }
    }
}

/// Paths of the external tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// Converter executable (`ogr2ogr`).
    pub converter: PathBuf,

    /// Source reader executable (`ogrinfo`).
    pub reader: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            converter: PathBuf::from("ogr2ogr"),
            reader: PathBuf::from("ogrinfo"),
        }
    }
}
