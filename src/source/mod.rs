//! Source container reader seam.
//!
//! The core never opens the container format itself. It consumes layers,
//! field definitions, free-form metadata dictionaries and attribute rows
//! through [`SourceContainer`], and two implementations are provided:
//!
//! - [`OgrInfoSource`]: backed by the `ogrinfo -json` tool
//! - [`MemorySource`]: in-memory, with call counters

pub mod memory;
pub mod ogrinfo;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::SourceError;

pub use memory::MemorySource;
pub use ogrinfo::OgrInfoSource;

/// Free-form metadata dictionary (key to value).
pub type MetadataMap = BTreeMap<String, String>;

/// One attribute row: column name to text value. Nulls are omitted.
pub type Row = BTreeMap<String, String>;

/// Summary of one layer, as listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub feature_count: Option<u64>,
    pub geometry_type: Option<String>,
    pub spatial_ref: Option<String>,
    pub field_count: usize,
}

/// Full schema of one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSchema {
    pub info: LayerInfo,

    /// Native row identifier column (e.g. `OBJECTID`).
    pub fid_column: Option<String>,

    /// Field definitions in declaration order.
    pub fields: Vec<FieldDefinition>,

    /// Layer-level metadata.
    pub metadata: MetadataMap,
}

impl LayerSchema {
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// Attribute field definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: Option<String>,

    /// Alias exposed by the driver itself, when it has one.
    pub alias: Option<String>,

    /// Name of the domain bound to this field.
    pub domain_name: Option<String>,

    /// Field-level metadata.
    pub metadata: MetadataMap,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain_name = Some(domain.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Read-only access to a source container.
///
/// Implementations open the container once and reuse that handle for every
/// call; nothing here mutates the container.
#[async_trait]
pub trait SourceContainer: Send + Sync {
    /// Container directory.
    fn path(&self) -> &Path;

    /// All layers with their summary information.
    async fn list_layers(&self) -> Result<Vec<LayerInfo>, SourceError>;

    /// Schema of one layer, `None` when the container has no such layer.
    async fn layer(&self, name: &str) -> Result<Option<LayerSchema>, SourceError>;

    /// Container-level metadata.
    async fn metadata(&self) -> Result<MetadataMap, SourceError>;

    /// Up to `limit` attribute rows of `layer`.
    async fn read_rows(&self, layer: &str, limit: usize) -> Result<Vec<Row>, SourceError>;
}
