//! External converter invocation.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{LayerConversionResult, LayerJob, WriteMode};
use crate::error::ConvertError;
use crate::supervisor::ProcessSupervisor;

/// Converts one layer into the destination.
#[async_trait]
pub trait LayerRunner: Send + Sync {
    /// Check that the converter can run. Returns its version line.
    async fn check_available(&self) -> Result<String, ConvertError>;

    /// Convert one layer. Every failure is reported in the result.
    async fn run(&self, job: &LayerJob) -> LayerConversionResult;
}

/// Runs `ogr2ogr` once per layer under a [`ProcessSupervisor`].
#[derive(Debug, Clone)]
pub struct Ogr2OgrRunner {
    program: PathBuf,
    source: PathBuf,
    destination: PathBuf,
    supervisor: ProcessSupervisor,
}

impl Ogr2OgrRunner {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("ogr2ogr"),
            source: source.into(),
            destination: destination.into(),
            supervisor: ProcessSupervisor::default(),
        }
    }

    /// Use a specific converter executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Converter arguments for `job`.
    pub fn arguments(&self, job: &LayerJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-f",
            "SQLite",
            "-dsco",
            "SPATIALITE=YES",
            "-progress",
            "-dsco",
            "INIT_WITH_EPSG=NO",
            "-lco",
            "SPATIAL_INDEX=YES",
            "-lco",
            "GEOMETRY_NAME=geometry",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        match job.mode {
            WriteMode::Create if job.overwrite => args.push("-overwrite".into()),
            WriteMode::Create => {}
            WriteMode::Append => args.push("-update".into()),
        }

        args.push("-nln".into());
        args.push(job.layer.clone().into());
        args.push(self.destination.clone().into());
        args.push(self.source.clone().into());
        args.push("-sql".into());
        args.push(format!("SELECT * FROM \"{}\"", job.layer.replace('"', "\"\"")).into());
        args
    }

    fn command(&self, job: &LayerJob) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.arguments(job));
        command
    }
}

#[async_trait]
impl LayerRunner for Ogr2OgrRunner {
    async fn check_available(&self) -> Result<String, ConvertError> {
        let unavailable = |reason: String| ConvertError::ConverterUnavailable {
            program: self.program.display().to_string(),
            reason,
        };

        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!(
                "exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or("")
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("").trim().to_string())
    }

    async fn run(&self, job: &LayerJob) -> LayerConversionResult {
        let started = Instant::now();
        let command = self.command(job);
        debug!(layer = %job.layer, command = ?command.as_std(), "Converter command");

        match self.supervisor.run(&job.layer, command).await {
            Ok(outcome) if outcome.success() => {
                info!(layer = %job.layer, "Layer converted");
                LayerConversionResult {
                    layer: job.layer.clone(),
                    success: true,
                    diagnostic: String::new(),
                    output_lines: outcome.output.len(),
                    elapsed: outcome.elapsed,
                    metadata: None,
                }
            }
            Ok(outcome) => {
                let diagnostic = outcome.tail(self.supervisor.config().diagnostic_tail);
                error!(layer = %job.layer, exit_code = ?outcome.exit_code, "Layer conversion failed: {diagnostic}");
                LayerConversionResult {
                    layer: job.layer.clone(),
                    success: false,
                    diagnostic,
                    output_lines: outcome.output.len(),
                    elapsed: outcome.elapsed,
                    metadata: None,
                }
            }
            Err(e) => {
                error!(layer = %job.layer, error = %e, "Layer conversion failed");
                LayerConversionResult::failed(&job.layer, e.to_string(), started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(runner: &Ogr2OgrRunner, job: &LayerJob) -> Vec<String> {
        runner
            .arguments(job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_create_without_overwrite() {
        let runner = Ogr2OgrRunner::new("/data/Cadastre.gdb", "/out/cadastre.sqlite");
        let job = LayerJob::new("Routes", WriteMode::Create, false);

        let args = args(&runner, &job);

        assert_eq!(&args[..5], ["-f", "SQLite", "-dsco", "SPATIALITE=YES", "-progress"]);
        assert!(args.contains(&"SPATIAL_INDEX=YES".to_string()));
        assert!(args.contains(&"GEOMETRY_NAME=geometry".to_string()));
        assert!(!args.contains(&"-overwrite".to_string()));
        assert!(!args.contains(&"-update".to_string()));
        assert_eq!(
            &args[args.len() - 6..],
            [
                "-nln",
                "Routes",
                "/out/cadastre.sqlite",
                "/data/Cadastre.gdb",
                "-sql",
                "SELECT * FROM \"Routes\""
            ]
        );
    }

    #[test]
    fn test_write_mode_flags() {
        let runner = Ogr2OgrRunner::new("a.gdb", "b.sqlite");

        let create = args(&runner, &LayerJob::new("Routes", WriteMode::Create, true));
        assert!(create.contains(&"-overwrite".to_string()));

        let append = args(&runner, &LayerJob::new("Routes", WriteMode::Append, true));
        assert!(append.contains(&"-update".to_string()));
        assert!(!append.contains(&"-overwrite".to_string()));
    }

    #[tokio::test]
    async fn test_missing_converter_fails_check_and_run() {
        let runner = Ogr2OgrRunner::new("a.gdb", "b.sqlite").with_program("/nonexistent/ogr2ogr");

        assert!(matches!(
            runner.check_available().await,
            Err(ConvertError::ConverterUnavailable { .. })
        ));

        let result = runner.run(&LayerJob::new("Routes", WriteMode::Create, false)).await;
        assert!(!result.success);
        assert!(result.diagnostic.contains("/nonexistent/ogr2ogr"));
    }
}
