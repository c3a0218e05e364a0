//! Schema metadata recovery.
//!
//! For every field of a converted layer, [`MetadataResolver`] walks a fixed
//! list of sources and keeps the first one that yields something:
//!
//! | Domain values        | Field aliases        |
//! |----------------------|----------------------|
//! | domain catalog       | driver alias         |
//! | layer metadata       | layer metadata       |
//! | container metadata   | container metadata   |
//! | field metadata       | field metadata       |
//! | data sampling        |                      |
//!
//! A failing source is logged and skipped; it never stops the waterfall.

pub mod grammar;
pub mod resolver;
pub mod tiers;

use std::collections::BTreeMap;

use crate::catalog::CodeMap;

pub use grammar::{parse_domain_string, MalformedValue};
pub use resolver::{MetadataResolver, DEFAULT_PRIMARY_KEY, DEFAULT_SAMPLE_LIMIT};
pub use tiers::{AliasTier, DomainTier, TierError};

/// Metadata recovered for one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerMetadata {
    /// Field name to alias.
    pub field_aliases: BTreeMap<String, String>,

    /// Field name to code map.
    pub domain_values: BTreeMap<String, CodeMap>,

    /// Ordered primary key columns.
    pub primary_keys: Vec<String>,

    /// Trigger SQL statements.
    pub triggers: Vec<String>,
}

impl LayerMetadata {
    pub fn is_empty(&self) -> bool {
        self.field_aliases.is_empty()
            && self.domain_values.is_empty()
            && self.primary_keys.is_empty()
            && self.triggers.is_empty()
    }

    /// Total number of code/description pairs.
    pub fn domain_value_count(&self) -> usize {
        self.domain_values.values().map(|values| values.len()).sum()
    }
}
