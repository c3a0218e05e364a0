//! Source reader backed by the `ogrinfo` command line tool.
//!
//! The container is described once (`ogrinfo -json -ro -so`) and the parsed
//! document is kept for the lifetime of the reader. Attribute rows are read
//! on demand with an OGR SQL query.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{FieldDefinition, LayerInfo, LayerSchema, MetadataMap, Row, SourceContainer};
use crate::error::SourceError;

/// `ogrinfo -json` document (only the parts we consume).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoDocument {
    #[serde(default)]
    layers: Vec<InfoLayer>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoLayer {
    name: String,
    #[serde(default)]
    feature_count: Option<u64>,
    #[serde(default)]
    fid_column_name: Option<String>,
    #[serde(default)]
    geometry_fields: Vec<InfoGeometryField>,
    #[serde(default)]
    fields: Vec<InfoField>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    features: Vec<InfoFeature>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoGeometryField {
    #[serde(default, rename = "type")]
    geometry_type: Option<String>,
    #[serde(default)]
    coordinate_system: Option<InfoCoordinateSystem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InfoCoordinateSystem {
    #[serde(default)]
    projjson: Option<Value>,
    #[serde(default)]
    wkt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoField {
    name: String,
    #[serde(default, rename = "type")]
    field_type: Option<String>,
    #[serde(default)]
    alternative_name: Option<String>,
    #[serde(default)]
    domain_name: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InfoFeature {
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

impl InfoLayer {
    fn info(&self) -> LayerInfo {
        let geometry = self.geometry_fields.first();
        LayerInfo {
            name: self.name.clone(),
            feature_count: self.feature_count,
            geometry_type: geometry.and_then(|g| g.geometry_type.clone()),
            spatial_ref: geometry
                .and_then(|g| g.coordinate_system.as_ref())
                .and_then(InfoCoordinateSystem::name),
            field_count: self.fields.len(),
        }
    }

    fn schema(&self) -> LayerSchema {
        LayerSchema {
            info: self.info(),
            fid_column: self.fid_column_name.clone().filter(|c| !c.is_empty()),
            fields: self.fields.iter().map(InfoField::definition).collect(),
            metadata: default_domain(&self.metadata),
        }
    }
}

impl InfoCoordinateSystem {
    fn name(&self) -> Option<String> {
        if let Some(name) = self
            .projjson
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
        {
            return Some(name.to_string());
        }
        // WKT starts with KIND["name", ...
        let wkt = self.wkt.as_deref()?;
        let start = wkt.find('"')? + 1;
        let end = start + wkt[start..].find('"')?;
        Some(wkt[start..end].to_string())
    }
}

impl InfoField {
    fn definition(&self) -> FieldDefinition {
        FieldDefinition {
            name: self.name.clone(),
            field_type: self.field_type.clone(),
            alias: self.alternative_name.clone().filter(|a| !a.is_empty()),
            domain_name: self.domain_name.clone().filter(|d| !d.is_empty()),
            metadata: default_domain(&self.metadata),
        }
    }
}

/// String entries of the default (`""`) metadata domain.
fn default_domain(metadata: &BTreeMap<String, Value>) -> MetadataMap {
    metadata
        .get("")
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Text rendering of one attribute value; `None` for nulls.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reader running `ogrinfo` against a container directory.
#[derive(Debug)]
pub struct OgrInfoSource {
    program: PathBuf,
    path: PathBuf,
    document: OnceCell<InfoDocument>,
}

impl OgrInfoSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_program("ogrinfo", path)
    }

    /// Use a specific `ogrinfo` executable.
    pub fn with_program(program: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            path: path.into(),
            document: OnceCell::new(),
        }
    }

    async fn document(&self) -> Result<&InfoDocument, SourceError> {
        self.document
            .get_or_try_init(|| async {
                debug!(container = %self.path.display(), "Describing source container");
                let stdout = self
                    .run(&["-json", "-ro", "-so"], &[self.path.as_os_str()])
                    .await?;
                Ok::<_, SourceError>(serde_json::from_slice(&stdout)?)
            })
            .await
    }

    async fn run(&self, flags: &[&str], trailing: &[&OsStr]) -> Result<Vec<u8>, SourceError> {
        let output = Command::new(&self.program)
            .args(flags)
            .args(trailing)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Command {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: stderr.lines().last().unwrap_or("").to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SourceContainer for OgrInfoSource {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn list_layers(&self) -> Result<Vec<LayerInfo>, SourceError> {
        Ok(self.document().await?.layers.iter().map(InfoLayer::info).collect())
    }

    async fn layer(&self, name: &str) -> Result<Option<LayerSchema>, SourceError> {
        Ok(self
            .document()
            .await?
            .layers
            .iter()
            .find(|layer| layer.name == name)
            .map(InfoLayer::schema))
    }

    async fn metadata(&self) -> Result<MetadataMap, SourceError> {
        Ok(default_domain(&self.document().await?.metadata))
    }

    async fn read_rows(&self, layer: &str, limit: usize) -> Result<Vec<Row>, SourceError> {
        if self.layer(layer).await?.is_none() {
            return Err(SourceError::LayerNotFound(layer.to_string()));
        }

        let sql = format!("SELECT * FROM \"{}\" LIMIT {limit}", layer.replace('"', "\"\""));
        let stdout = self
            .run(
                &["-json", "-ro", "-features", "-geom=NO", "-sql", sql.as_str()],
                &[self.path.as_os_str()],
            )
            .await?;
        let document: InfoDocument = serde_json::from_slice(&stdout)?;

        Ok(document
            .layers
            .into_iter()
            .flat_map(|layer| layer.features)
            .map(|feature| {
                feature
                    .properties
                    .iter()
                    .filter_map(|(k, v)| value_text(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .take(limit)
            .collect())
    }
}
