//! In-process conversion through the GDAL library.
//!
//! Used when the `ogr2ogr` executable is missing or unwanted. Each layer is
//! copied with `GDALDatasetCopyLayer` on a blocking thread, with the same
//! destination and layer options the external converter gets.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use gdal::cpl::CslStringList;
use gdal::vector::LayerAccess;
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use tracing::{debug, error, info};

use super::{LayerConversionResult, LayerJob, LayerRunner, WriteMode};
use crate::error::ConvertError;

const SOURCE_DRIVER: &str = "OpenFileGDB";
const DESTINATION_DRIVER: &str = "SQLite";

/// Copies layers in-process with the GDAL library.
#[derive(Debug, Clone)]
pub struct GdalRunner {
    source: PathBuf,
    destination: PathBuf,
}

impl GdalRunner {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl LayerRunner for GdalRunner {
    async fn check_available(&self) -> Result<String, ConvertError> {
        for driver in [SOURCE_DRIVER, DESTINATION_DRIVER] {
            DriverManager::get_driver_by_name(driver).map_err(|e| {
                ConvertError::ConverterUnavailable {
                    program: "GDAL library".into(),
                    reason: format!("driver {driver} missing: {e}"),
                }
            })?;
        }
        Ok(gdal::version::version_info("--version"))
    }

    async fn run(&self, job: &LayerJob) -> LayerConversionResult {
        let started = Instant::now();
        let source = self.source.clone();
        let destination = self.destination.clone();
        let task_job = job.clone();

        let copied =
            tokio::task::spawn_blocking(move || copy_layer(&source, &destination, &task_job))
                .await
                .unwrap_or_else(|e| Err(format!("conversion task failed: {e}")));

        match copied {
            Ok(features) => {
                info!(layer = %job.layer, features, "Layer converted");
                LayerConversionResult {
                    layer: job.layer.clone(),
                    success: true,
                    elapsed: started.elapsed(),
                    ..Default::default()
                }
            }
            Err(diagnostic) => {
                error!(layer = %job.layer, "Layer conversion failed: {diagnostic}");
                LayerConversionResult::failed(&job.layer, diagnostic, started.elapsed())
            }
        }
    }
}

/// Copy one layer and return its feature count.
fn copy_layer(source: &Path, destination: &Path, job: &LayerJob) -> Result<u64, String> {
    let source = Dataset::open_ex(
        source,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_READONLY,
            ..Default::default()
        },
    )
    .map_err(|e| format!("cannot open source: {e}"))?;
    let layer = source
        .layer_by_name(&job.layer)
        .map_err(|e| format!("layer not found: {e}"))?;
    let features = layer.feature_count();
    debug!(layer = %job.layer, features, "Copying layer");

    let target = match job.mode {
        WriteMode::Create => create_destination(destination, job.overwrite)?,
        WriteMode::Append => Dataset::open_ex(
            destination,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_UPDATE,
                ..Default::default()
            },
        )
        .map_err(|e| format!("cannot open destination: {e}"))?,
    };

    let name = c_string(&job.layer)?;
    let options = string_list(&[("SPATIAL_INDEX", "YES"), ("GEOMETRY_NAME", "geometry")])?;
    let copied = unsafe {
        gdal_sys::GDALDatasetCopyLayer(
            target.c_dataset(),
            layer.c_layer(),
            name.as_ptr(),
            options.as_ptr() as _,
        )
    };
    if copied.is_null() {
        return Err(last_error().unwrap_or_else(|| "layer copy failed".into()));
    }

    // Closing the destination flushes it.
    drop(target);
    Ok(features)
}

fn create_destination(destination: &Path, overwrite: bool) -> Result<Dataset, String> {
    if overwrite && destination.exists() {
        std::fs::remove_file(destination)
            .map_err(|e| format!("cannot replace destination: {e}"))?;
    }

    let driver =
        DriverManager::get_driver_by_name(DESTINATION_DRIVER).map_err(|e| e.to_string())?;
    let path = c_string(&destination.to_string_lossy())?;
    let options = string_list(&[("SPATIALITE", "YES"), ("INIT_WITH_EPSG", "NO")])?;

    let handle = unsafe {
        gdal_sys::GDALCreate(
            driver.c_driver(),
            path.as_ptr(),
            0,
            0,
            0,
            gdal_sys::GDALDataType::GDT_Unknown,
            options.as_ptr() as _,
        )
    };
    if handle.is_null() {
        return Err(last_error().unwrap_or_else(|| "cannot create destination".into()));
    }
    Ok(unsafe { Dataset::from_c_dataset(handle) })
}

fn c_string(value: &str) -> Result<CString, String> {
    CString::new(value).map_err(|e| format!("invalid name {value:?}: {e}"))
}

fn string_list(pairs: &[(&str, &str)]) -> Result<CslStringList, String> {
    let mut list = CslStringList::new();
    for (key, value) in pairs {
        list.set_name_value(key, value).map_err(|e| e.to_string())?;
    }
    Ok(list)
}

fn last_error() -> Option<String> {
    let message = unsafe { CStr::from_ptr(gdal_sys::CPLGetLastErrorMsg()) };
    let message = message.to_string_lossy().trim().to_string();
    (!message.is_empty()).then_some(message)
}
