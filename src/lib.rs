//! gdb2spatialite - file geodatabase to Spatialite conversion
//!
//! The geometry/attribute copy itself is delegated to an external converter
//! (`ogr2ogr`), or to the GDAL library in-process with the `gdal` feature. This crate supervises that converter one layer at a time and
//! recovers the schema metadata the generic driver does not expose:
//!
//! - field aliases
//! - coded-value domains (parsed out of the container's binary catalog files)
//! - primary keys
//!
//! Recovered metadata is written into overlay tables in the destination file
//! (`metadata_field_aliases`, `metadata_domain_values`).
//!
//! # Layout
//!
//! - [`catalog`]: catalog file discovery, tolerant domain XML parsing, code normalization
//! - [`source`]: source container reader seam (`ogrinfo` backed and in-memory)
//! - [`metadata`]: per-field fallback waterfall for aliases, domains and keys
//! - [`overlay`]: destination overlay tables and post-run tuning
//! - [`supervisor`]: external process supervision (drain, adaptive polling, stalls)
//! - [`convert`]: layer sequencing under the single-writer rule

pub mod catalog;
pub mod config;
pub mod convert;
pub mod error;
pub mod metadata;
pub mod overlay;
pub mod source;
pub mod supervisor;

pub use catalog::{normalize_code, CatalogLocator, CodeMap, DomainCatalog, RegexCatalogParser};
pub use config::{ConvertOptions, LocatorConfig, MetadataOptions, SupervisorConfig, ToolPaths};
pub use convert::{
    validate_source, ConversionReport, Converter, LayerConversionResult, LayerJob, LayerRunner,
    Ogr2OgrRunner, WriteMode,
};
#[cfg(feature = "gdal")]
pub use convert::GdalRunner;
pub use error::{ConvertError, SourceError};
pub use metadata::{LayerMetadata, MetadataResolver};
pub use overlay::{OverlayOutcome, OverlayStore};
pub use source::{
    FieldDefinition, LayerInfo, LayerSchema, MemorySource, MetadataMap, OgrInfoSource, Row,
    SourceContainer,
};
pub use supervisor::{ProcessOutcome, ProcessSupervisor};
