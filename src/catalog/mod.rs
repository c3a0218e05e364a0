//! Coded-value domain catalog recovery.
//!
//! The container keeps its domain definitions as XML inside one of its raw
//! table files, but nothing says which one. Recovery is three steps:
//!
//! 1. [`CatalogLocator`] scores every raw table file and picks the best one
//! 2. the file is decoded permissively and handed to a [`CatalogParser`]
//! 3. codes are canonicalized to integers by [`normalize_code`]

pub mod code;
pub mod locator;
pub mod parser;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

pub use code::normalize_code;
pub use locator::CatalogLocator;
pub use parser::{CatalogParser, RegexCatalogParser};

/// Integer code to description.
pub type CodeMap = BTreeMap<i64, String>;

/// Domain name to its code map.
///
/// Built once per container and never mutated afterwards. A missing name
/// means "not found"; there are no empty placeholder entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCatalog {
    domains: BTreeMap<String, CodeMap>,
}

impl DomainCatalog {
    pub fn get(&self, name: &str) -> Option<&CodeMap> {
        self.domains.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.domains.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CodeMap)> {
        self.domains.iter()
    }

    /// Insert a domain, returning the definition it replaced.
    pub(crate) fn insert(&mut self, name: String, values: CodeMap) -> Option<CodeMap> {
        self.domains.insert(name, values)
    }
}

impl FromIterator<(String, CodeMap)> for DomainCatalog {
    fn from_iter<T: IntoIterator<Item = (String, CodeMap)>>(iter: T) -> Self {
        Self {
            domains: iter.into_iter().collect(),
        }
    }
}

/// Locate, read and parse the domain catalog of the container at `container`.
///
/// Every failure degrades to an empty catalog.
pub async fn load_catalog(
    locator: &CatalogLocator,
    parser: &dyn CatalogParser,
    container: &Path,
) -> DomainCatalog {
    let Some(catalog_file) = locator.locate(container).await else {
        debug!(container = %container.display(), "No domain catalog file found");
        return DomainCatalog::default();
    };

    let bytes = match tokio::fs::read(&catalog_file).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(file = %catalog_file.display(), error = %e, "Failed to read catalog file");
            return DomainCatalog::default();
        }
    };

    let text = String::from_utf8_lossy(&bytes);
    let catalog = parser.parse(&text);

    if !catalog.is_empty() {
        info!(
            domains = catalog.len(),
            file = %catalog_file.display(),
            "Loaded coded-value domains from catalog"
        );
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocatorConfig;
    use tempfile::tempdir;

    fn domain_block(name: &str, code: i64, label: &str) -> String {
        format!(
            "<GPCodedValueDomain2><DomainName>{name}</DomainName>\
             <CodedValue><Code>{code}</Code><Name>{label}</Name></CodedValue></GPCodedValueDomain2>"
        )
    }

    #[tokio::test]
    async fn test_load_catalog_end_to_end() {
        let dir = tempdir().unwrap();
        let mut content = b"\x00\x01binary header\xff\xfe".to_vec();
        for i in 0..6 {
            content.extend_from_slice(domain_block(&format!("D{i}"), i, "Label").as_bytes());
            content.extend_from_slice(b"\x00\x9f");
        }
        std::fs::write(dir.path().join("a00000004.gdbtable"), content).unwrap();

        let locator = CatalogLocator::new(LocatorConfig::default());
        let catalog = load_catalog(&locator, &RegexCatalogParser::new(), dir.path()).await;

        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.get("D3").unwrap()[&3], "Label");
    }

    #[tokio::test]
    async fn test_load_catalog_without_candidates_is_empty() {
        let dir = tempdir().unwrap();
        let locator = CatalogLocator::new(LocatorConfig::default());
        let catalog = load_catalog(&locator, &RegexCatalogParser::new(), dir.path()).await;
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_from_iter() {
        let catalog: DomainCatalog = [("A".to_string(), CodeMap::from([(1, "Un".to_string())]))]
            .into_iter()
            .collect();
        assert!(catalog.contains("A"));
        assert!(catalog.get("B").is_none());
    }
}
