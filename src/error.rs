//! Error taxonomy for the conversion pipeline
//!
//! Input validation and orchestration failures are fatal and surface as
//! [`ConvertError`]. Everything below the orchestrator (per-layer conversion,
//! per-tier metadata recovery, overlay writes) reports failure locally and is
//! never escalated into this type.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors reported to the caller of [`crate::Converter`].
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Source path does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Source path must be a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("Destination already exists: {0} (use --overwrite to replace it)")]
    DestinationExists(PathBuf),

    #[error("Converter '{program}' is not available: {reason}")]
    ConverterUnavailable { program: String, reason: String },

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Whether this error comes from validating user input rather than from
    /// an unexpected failure.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ConvertError::SourceMissing(_)
                | ConvertError::SourceNotDirectory(_)
                | ConvertError::DestinationExists(_)
        )
    }
}

/// Errors raised by a [`crate::SourceContainer`] implementation.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{program}' exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid reader output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),
}
