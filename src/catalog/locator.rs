//! Heuristic discovery of the catalog file holding domain definitions.
//!
//! Raw table files have opaque names, so every one of them is a candidate.
//! Each candidate is scored on the XML indicators it contains and the best
//! one above the threshold wins. A candidate that cannot be read is skipped;
//! it never aborts the scan.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::parser::count_domain_blocks;
use crate::config::LocatorConfig;

/// Extension of the container's raw table files.
pub const RAW_TABLE_EXTENSION: &str = "gdbtable";

/// Substrings associated with coded-domain XML, with their weight.
const INDICATORS: &[(&str, u32)] = &[
    ("GPCodedValueDomain2", 10),
    ("<DomainName>", 5),
    ("<CodedValue", 3),
    ("<Code>", 2),
    ("<Name>", 2),
];

/// Points per complete domain block.
const BLOCK_WEIGHT: u32 = 5;

/// A scored candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCandidate {
    pub path: PathBuf,
    pub score: u32,
}

/// Finds the catalog file of a container. Results are cached per container
/// directory for the lifetime of the locator.
#[derive(Debug)]
pub struct CatalogLocator {
    config: LocatorConfig,
    cache: Mutex<HashMap<PathBuf, Option<PathBuf>>>,
    files_scanned: AtomicUsize,
}

impl Default for CatalogLocator {
    fn default() -> Self {
        Self::new(LocatorConfig::default())
    }
}

impl CatalogLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            files_scanned: AtomicUsize::new(0),
        }
    }

    /// Number of candidate files read so far.
    pub fn files_scanned(&self) -> usize {
        self.files_scanned.load(Ordering::Relaxed)
    }

    /// Best catalog candidate in `container`, if any scores above threshold.
    ///
    /// Returns `None` when the directory is missing, has no raw table files,
    /// or no candidate passes the threshold.
    pub async fn locate(&self, container: &Path) -> Option<PathBuf> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(container) {
            return cached.clone();
        }

        let found = self.scan(container).await.map(|candidate| {
            debug!(
                file = %candidate.path.display(),
                score = candidate.score,
                "Selected domain catalog file"
            );
            candidate.path
        });
        cache.insert(container.to_path_buf(), found.clone());
        found
    }

    async fn scan(&self, container: &Path) -> Option<CatalogCandidate> {
        let candidates = match raw_table_files(container).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!(container = %container.display(), error = %e, "Cannot list container");
                return None;
            }
        };

        let mut best: Option<CatalogCandidate> = None;
        for path in candidates {
            let score = match self.score(&path).await {
                Ok(score) => score,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "Skipping unreadable candidate");
                    continue;
                }
            };

            if score <= self.config.min_score {
                continue;
            }
            if best.as_ref().is_none_or(|current| score > current.score) {
                debug!(file = %path.display(), score, "Catalog candidate");
                best = Some(CatalogCandidate { path, score });
            }
        }
        best
    }

    /// Containment score of one file.
    ///
    /// Large files are scored on their prefix (indicator presence plus
    /// complete blocks). Files under the full-scan limit are scored on
    /// complete domain blocks over their whole content.
    pub async fn score(&self, path: &Path) -> io::Result<u32> {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);

        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        if size < self.config.full_scan_limit {
            let mut content = Vec::with_capacity(size as usize);
            file.read_to_end(&mut content).await?;
            return Ok(full_scan_score(&String::from_utf8_lossy(&content)));
        }

        let mut prefix = Vec::new();
        file.take(self.config.prefix_bytes)
            .read_to_end(&mut prefix)
            .await?;
        Ok(prefix_score(&String::from_utf8_lossy(&prefix)))
    }
}

/// Indicator presence plus complete block bonus.
pub fn prefix_score(text: &str) -> u32 {
    let indicators: u32 = INDICATORS
        .iter()
        .filter(|(needle, _)| text.contains(needle))
        .map(|(_, weight)| weight)
        .sum();
    indicators + block_score(text)
}

/// Complete blocks only.
pub fn full_scan_score(text: &str) -> u32 {
    block_score(text)
}

fn block_score(text: &str) -> u32 {
    u32::try_from(count_domain_blocks(text))
        .unwrap_or(u32::MAX)
        .saturating_mul(BLOCK_WEIGHT)
}

async fn raw_table_files(container: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(container).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_raw_table(&path) {
            continue;
        }
        match entry.file_type().await {
            // Links are kept; a dangling one fails when scored.
            Ok(file_type) if !file_type.is_dir() => files.push(path),
            Ok(_) => {}
            Err(e) => debug!(file = %path.display(), error = %e, "Skipping candidate"),
        }
    }

    files.sort();
    Ok(files)
}

fn is_raw_table(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(RAW_TABLE_EXTENSION))
}
