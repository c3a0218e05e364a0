//! Fallback tiers and the metadata keys each tier reads.

use std::fmt;

use thiserror::Error;

use super::grammar::{parse_domain_string, MalformedValue};
use crate::catalog::CodeMap;
use crate::error::SourceError;
use crate::source::MetadataMap;

/// Failure of one tier. Logged and skipped by the waterfall.
#[derive(Error, Debug)]
pub enum TierError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Malformed(#[from] MalformedValue),
}

/// Domain value sources, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainTier {
    Catalog,
    LayerMetadata,
    ContainerMetadata,
    FieldMetadata,
    DataSampling,
}

impl DomainTier {
    pub const ALL: [DomainTier; 5] = [
        DomainTier::Catalog,
        DomainTier::LayerMetadata,
        DomainTier::ContainerMetadata,
        DomainTier::FieldMetadata,
        DomainTier::DataSampling,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DomainTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DomainTier::Catalog => "catalog",
            DomainTier::LayerMetadata => "layer metadata",
            DomainTier::ContainerMetadata => "container metadata",
            DomainTier::FieldMetadata => "field metadata",
            DomainTier::DataSampling => "data sampling",
        };
        f.write_str(name)
    }
}

/// Field alias sources, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasTier {
    Native,
    LayerMetadata,
    ContainerMetadata,
    FieldMetadata,
}

impl AliasTier {
    pub const ALL: [AliasTier; 4] = [
        AliasTier::Native,
        AliasTier::LayerMetadata,
        AliasTier::ContainerMetadata,
        AliasTier::FieldMetadata,
    ];
}

/// Key fragments marking a metadata entry as domain values.
pub const DOMAIN_MARKERS: &[&str] = &["CODE", "DOMAIN", "VALUE"];

/// Key fragments marking a metadata entry as a primary key declaration.
pub const PRIMARY_KEY_MARKERS: &[&str] = &["PRIMARY_KEY", "PK_"];

/// Field metadata keys holding an alias, most explicit first.
pub const FIELD_ALIAS_KEYS: &[&str] = &["ALIAS", "ALTERNATIVE_NAME"];

/// Alias keys looked up in layer metadata for field number `index`.
pub fn layer_alias_keys(field: &str, index: usize) -> Vec<String> {
    vec![
        format!("FIELD_{index}_ALIAS"),
        format!("{field}_ALIAS"),
        format!("ALIAS_{field}"),
        format!("FIELD_ALIAS_{index}"),
    ]
}

/// Alias keys looked up in container metadata for field number `index` of `layer`.
pub fn container_alias_keys(layer: &str, field: &str, index: usize) -> Vec<String> {
    vec![
        format!("{layer}.{field}.ALIAS"),
        format!("{layer}.FIELD_{index}.ALIAS"),
        format!("GDB_{layer}.{field}.ALIAS"),
    ]
}

/// First present, non-empty value among `keys`.
pub fn first_value<S: AsRef<str>>(metadata: &MetadataMap, keys: &[S]) -> Option<String> {
    keys.iter()
        .filter_map(|key| metadata.get(key.as_ref()))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Case-insensitive key filter: the key must mention one of the subject
/// terms (when there are any) and one of the markers.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    terms: Vec<String>,
    markers: &'static [&'static str],
}

impl KeyMatcher {
    pub fn new<I, S>(terms: I, markers: &'static [&'static str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
            markers,
        }
    }

    /// Matcher on markers alone.
    pub fn markers(markers: &'static [&'static str]) -> Self {
        Self::new(std::iter::empty::<&str>(), markers)
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_uppercase();
        let subject = self.terms.is_empty() || self.terms.iter().any(|t| key.contains(t.as_str()));
        subject && self.markers.iter().any(|m| key.contains(m))
    }
}

/// Merge the domain strings of every matching entry.
///
/// Malformed entries are skipped while others still parse; the error is
/// only reported when nothing usable was found.
pub fn scan_metadata(metadata: &MetadataMap, matcher: &KeyMatcher) -> Result<CodeMap, TierError> {
    let mut values = CodeMap::new();
    let mut malformed = None;

    let matching = metadata
        .iter()
        .filter(|(key, _)| matcher.matches(key))
        .map(|(_, value)| value);

    for value in matching {
        match parse_domain_string(value) {
            Ok(parsed) => values.extend(parsed),
            Err(e) => {
                malformed.get_or_insert(e);
            }
        }
    }

    match malformed {
        Some(e) if values.is_empty() => Err(e.into()),
        _ => Ok(values),
    }
}

/// Column list of a primary key declaration (`"A, B"`).
pub fn split_columns(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|c| !c.is_empty())
}
