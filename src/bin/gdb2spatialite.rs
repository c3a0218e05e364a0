//! gdb2spatialite CLI
//!
//! Converts a file geodatabase directory into a Spatialite file, one layer
//! at a time, and carries field aliases, coded-value domains and primary
//! keys over into overlay tables.
//!
//! Usage:
//!   gdb2spatialite Cadastre.gdb cadastre.sqlite
//!   gdb2spatialite Cadastre.gdb cadastre.sqlite --layer Routes --overwrite
//!   gdb2spatialite Cadastre.gdb --list-layers
//!   gdb2spatialite Cadastre.gdb cadastre.sqlite --no-ogr2ogr   (needs the `gdal` feature)
//!
//! Every option can also be set from the environment (`GDB2SPATIALITE_*`,
//! `.env` honoured). `RUST_LOG` overrides the log level.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gdal")]
use gdb2spatialite::GdalRunner;
use gdb2spatialite::{
    validate_source, ConvertError, ConvertOptions, Converter, LayerRunner, MetadataOptions,
    OgrInfoSource, Ogr2OgrRunner, SourceContainer, ToolPaths,
};

/// File geodatabase to Spatialite converter
#[derive(Parser, Debug)]
#[command(name = "gdb2spatialite")]
#[command(version, about = "Convert a file geodatabase to Spatialite, keeping aliases, domains and keys")]
struct Args {
    /// Source geodatabase directory (e.g. Cadastre.gdb)
    #[arg(env = "GDB2SPATIALITE_SOURCE")]
    source: PathBuf,

    /// Destination Spatialite file (.sqlite or .db)
    #[arg(env = "GDB2SPATIALITE_DESTINATION", required_unless_present = "list_layers")]
    destination: Option<PathBuf>,

    /// Convert only this layer
    #[arg(long, short = 'l', env = "GDB2SPATIALITE_LAYER")]
    layer: Option<String>,

    /// Replace the destination if it exists
    #[arg(long, env = "GDB2SPATIALITE_OVERWRITE")]
    overwrite: bool,

    /// List the source layers and exit
    #[arg(long)]
    list_layers: bool,

    /// Requested worker count (sequential whenever layers share the destination)
    #[arg(long, short = 'w', default_value_t = 1, env = "GDB2SPATIALITE_WORKERS")]
    workers: usize,

    /// Converter executable
    #[arg(long, env = "GDB2SPATIALITE_CONVERTER")]
    converter: Option<PathBuf>,

    /// Convert in-process with the GDAL library instead of the converter executable
    #[arg(long, env = "GDB2SPATIALITE_NO_OGR2OGR")]
    no_ogr2ogr: bool,

    /// Source reader executable
    #[arg(long, env = "GDB2SPATIALITE_OGRINFO")]
    ogrinfo: Option<PathBuf>,

    /// Only log at info level and above
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Do not carry any metadata over
    #[arg(long, env = "GDB2SPATIALITE_NO_METADATA")]
    no_metadata: bool,

    /// Do not carry field aliases over
    #[arg(long)]
    skip_aliases: bool,

    /// Do not carry coded-value domains over
    #[arg(long)]
    skip_domains: bool,

    /// Do not declare primary keys
    #[arg(long)]
    skip_primary_keys: bool,

    /// Do not recreate triggers
    #[arg(long)]
    skip_triggers: bool,

    /// Aggressive destination tuning (no journal, no fsync)
    #[arg(long, env = "GDB2SPATIALITE_FAST_MODE")]
    fast_mode: bool,
}

impl Args {
    fn tools(&self) -> ToolPaths {
        let mut tools = ToolPaths::default();
        if let Some(converter) = &self.converter {
            tools.converter = converter.clone();
        }
        if let Some(reader) = &self.ogrinfo {
            tools.reader = reader.clone();
        }
        tools
    }

    fn options(&self) -> ConvertOptions {
        let mut options = ConvertOptions::default()
            .overwrite(self.overwrite)
            .workers(self.workers)
            .fast_mode(self.fast_mode)
            .metadata(MetadataOptions::from_flags(
                self.no_metadata,
                self.skip_aliases,
                self.skip_domains,
                self.skip_primary_keys,
                self.skip_triggers,
            ));
        if let Some(layer) = &self.layer {
            options = options.layer(layer);
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.quiet { "info" } else { "debug" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<ConvertError>() {
                Some(input) if input.is_input_error() => {
                    eprintln!("{}: {}", "error".red().bold(), input)
                }
                _ => eprintln!("{}: {:?}", "unexpected error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let tools = args.tools();
    let source = Arc::new(OgrInfoSource::with_program(&tools.reader, &args.source));

    if args.list_layers {
        validate_source(&args.source).await?;
        list_layers(source.as_ref()).await?;
        return Ok(true);
    }

    let Some(destination) = args.destination.clone() else {
        bail!("A destination file is required");
    };

    let converter = converter(&args, &tools, source, destination)?;

    let report = converter.run().await?;
    Ok(report.success())
}

#[cfg(feature = "gdal")]
fn converter(
    args: &Args,
    tools: &ToolPaths,
    source: Arc<OgrInfoSource>,
    destination: PathBuf,
) -> Result<Converter> {
    let in_process: Arc<dyn LayerRunner> = Arc::new(GdalRunner::new(&args.source, &destination));
    if args.no_ogr2ogr {
        return Ok(Converter::new(source, destination, in_process, args.options()));
    }

    let runner = Ogr2OgrRunner::new(&args.source, &destination).with_program(&tools.converter);
    Ok(Converter::new(source, destination, Arc::new(runner), args.options())
        .with_fallback(in_process))
}

#[cfg(not(feature = "gdal"))]
fn converter(
    args: &Args,
    tools: &ToolPaths,
    source: Arc<OgrInfoSource>,
    destination: PathBuf,
) -> Result<Converter> {
    if args.no_ogr2ogr {
        bail!("In-process conversion needs a build with the `gdal` feature");
    }

    let runner: Arc<dyn LayerRunner> =
        Arc::new(Ogr2OgrRunner::new(&args.source, &destination).with_program(&tools.converter));
    Ok(Converter::new(source, destination, runner, args.options()))
}

async fn list_layers(source: &dyn SourceContainer) -> Result<()> {
    let path = source.path().display().to_string();
    let layers = source
        .list_layers()
        .await
        .with_context(|| format!("Failed to list layers of {path}"))?;

    println!("{} {}", "Layers in".bold(), path);
    if layers.is_empty() {
        println!("  {}", "(none)".dimmed());
        return Ok(());
    }
    for (i, layer) in layers.iter().enumerate() {
        match layer.feature_count {
            Some(count) => println!("  {}. {} ({} features)", i + 1, layer.name.green(), count),
            None => println!("  {}. {}", i + 1, layer.name.green()),
        }
    }
    Ok(())
}
