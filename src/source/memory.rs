//! In-memory source container.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{FieldDefinition, LayerInfo, LayerSchema, MetadataMap, Row, SourceContainer};
use crate::error::SourceError;

#[derive(Debug, Clone, Default)]
struct MemoryLayer {
    schema: LayerSchema,
    rows: Vec<Row>,
}

/// Source container held entirely in memory.
///
/// Counts row and metadata reads so callers can observe which fallbacks
/// actually touched the source.
#[derive(Debug, Default)]
pub struct MemorySource {
    path: PathBuf,
    layers: Vec<MemoryLayer>,
    metadata: MetadataMap,
    row_reads: AtomicUsize,
    metadata_reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a layer with the given fields.
    pub fn with_layer(mut self, name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        let name = name.into();
        let schema = LayerSchema {
            info: LayerInfo {
                name,
                field_count: fields.len(),
                ..Default::default()
            },
            fid_column: None,
            fields,
            metadata: MetadataMap::new(),
        };
        self.layers.push(MemoryLayer {
            schema,
            rows: Vec::new(),
        });
        self
    }

    /// Set the native row identifier column of the last added layer.
    pub fn with_fid_column(mut self, column: impl Into<String>) -> Self {
        if let Some(layer) = self.layers.last_mut() {
            layer.schema.fid_column = Some(column.into());
        }
        self
    }

    /// Add a metadata entry to the last added layer.
    pub fn with_layer_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(layer) = self.layers.last_mut() {
            layer.schema.metadata.insert(key.into(), value.into());
        }
        self
    }

    /// Add an attribute row to the last added layer.
    pub fn with_row<K, V>(mut self, row: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(layer) = self.layers.last_mut() {
            layer.rows.push(
                row.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect::<BTreeMap<_, _>>(),
            );
            layer.schema.info.feature_count = Some(layer.rows.len() as u64);
        }
        self
    }

    /// Add a container-level metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of `read_rows` calls so far.
    pub fn row_reads(&self) -> usize {
        self.row_reads.load(Ordering::Relaxed)
    }

    /// Number of container-level `metadata` calls so far.
    pub fn metadata_reads(&self) -> usize {
        self.metadata_reads.load(Ordering::Relaxed)
    }

    fn find(&self, name: &str) -> Option<&MemoryLayer> {
        self.layers.iter().find(|layer| layer.schema.name() == name)
    }
}

#[async_trait]
impl SourceContainer for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn list_layers(&self) -> Result<Vec<LayerInfo>, SourceError> {
        Ok(self
            .layers
            .iter()
            .map(|layer| layer.schema.info.clone())
            .collect())
    }

    async fn layer(&self, name: &str) -> Result<Option<LayerSchema>, SourceError> {
        Ok(self.find(name).map(|layer| layer.schema.clone()))
    }

    async fn metadata(&self) -> Result<MetadataMap, SourceError> {
        self.metadata_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.metadata.clone())
    }

    async fn read_rows(&self, layer: &str, limit: usize) -> Result<Vec<Row>, SourceError> {
        self.row_reads.fetch_add(1, Ordering::Relaxed);
        let layer = self
            .find(layer)
            .ok_or_else(|| SourceError::LayerNotFound(layer.to_string()))?;
        Ok(layer.rows.iter().take(limit).cloned().collect())
    }
}
