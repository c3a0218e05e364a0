//! Conversion pipeline integration tests
//!
//! Drives the [`Converter`] with an in-memory source and a runner that
//! writes real SQLite tables, then checks what ended up in the destination.
//!
//! Run with: cargo test --test conversion_pipeline

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::{tempdir, TempDir};

use gdb2spatialite::{
    ConvertError, ConvertOptions, Converter, FieldDefinition, LayerConversionResult, LayerJob,
    LayerRunner, MemorySource, MetadataOptions, WriteMode,
};

/// Runner standing in for the external converter: creates one table per
/// layer (named in lowercase) and records what it was asked to do.
#[derive(Default)]
struct SqlRunner {
    destination: PathBuf,
    failing: HashSet<String>,
    unavailable: bool,
    jobs: Mutex<Vec<LayerJob>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    availability_checks: AtomicUsize,
}

impl SqlRunner {
    fn new(destination: &Path) -> Self {
        Self {
            destination: destination.to_path_buf(),
            ..Default::default()
        }
    }

    fn failing(mut self, layer: &str) -> Self {
        self.failing.insert(layer.to_string());
        self
    }

    fn jobs(&self) -> Vec<LayerJob> {
        self.jobs.lock().unwrap().clone()
    }

    async fn create_table(&self, layer: &str) -> Result<(), sqlx::Error> {
        let mut conn = SqliteConnectOptions::new()
            .filename(&self.destination)
            .create_if_missing(true)
            .connect()
            .await?;
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (ogc_fid INTEGER PRIMARY KEY, NATURE INTEGER, NOM TEXT)"#,
            layer.to_lowercase()
        );
        sqlx::query(&sql).execute(&mut conn).await?;
        conn.close().await
    }
}

#[async_trait]
impl LayerRunner for SqlRunner {
    async fn check_available(&self) -> Result<String, ConvertError> {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(ConvertError::ConverterUnavailable {
                program: "ogr2ogr".into(),
                reason: "not installed".into(),
            });
        }
        Ok("GDAL 3.8.4, released 2024/02/08".into())
    }

    async fn run(&self, job: &LayerJob) -> LayerConversionResult {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let created = self.create_table(&job.layer).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match created {
            Ok(()) if !self.failing.contains(&job.layer) => LayerConversionResult {
                layer: job.layer.clone(),
                success: true,
                ..Default::default()
            },
            Ok(()) => LayerConversionResult::failed(
                &job.layer,
                "ERROR 1: Unable to open datasource",
                Duration::ZERO,
            ),
            Err(e) => LayerConversionResult::failed(&job.layer, e.to_string(), Duration::ZERO),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    destination: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let source = dir.path().join("Cadastre.gdb");
    std::fs::create_dir(&source).unwrap();
    let destination = dir.path().join("out").join("cadastre.sqlite");
    Fixture {
        _dir: dir,
        source,
        destination,
    }
}

fn cadastre(path: &Path) -> MemorySource {
    MemorySource::new(path)
        .with_layer(
            "Parcelles",
            vec![
                FieldDefinition::new("NATURE")
                    .with_domain("NatureSol")
                    .with_alias("Nature du sol"),
                FieldDefinition::new("SURFACE"),
            ],
        )
        .with_fid_column("OBJECTID")
        .with_layer_metadata("NATURESOL_CODES", "1:Bati;2:Non bati")
        .with_layer("Routes", vec![FieldDefinition::new("NOM").with_alias("Nom de la voie")])
        .with_layer("Broken", vec![FieldDefinition::new("X")])
}

async fn scalar(destination: &Path, sql: &str) -> i64 {
    let mut conn = SqliteConnectOptions::new()
        .filename(destination)
        .connect()
        .await
        .unwrap();
    let n: i64 = sqlx::query_scalar(sql).fetch_one(&mut conn).await.unwrap();
    conn.close().await.unwrap();
    n
}

#[tokio::test]
async fn test_layers_run_sequentially_and_metadata_lands_in_overlay() {
    let fx = fixture();
    let runner = Arc::new(SqlRunner::new(&fx.destination).failing("Broken"));
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        runner.clone(),
        ConvertOptions::default().workers(4),
    );

    let report = converter.run().await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded(), 2);
    assert!(report.success());
    assert_eq!(report.workers, 1);
    assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);

    let modes: Vec<_> = runner.jobs().into_iter().map(|j| (j.layer, j.mode)).collect();
    assert_eq!(
        modes,
        vec![
            ("Parcelles".to_string(), WriteMode::Create),
            ("Routes".to_string(), WriteMode::Append),
            ("Broken".to_string(), WriteMode::Append),
        ]
    );

    let names: Vec<_> = report.results.iter().map(|r| r.layer.as_str()).collect();
    assert_eq!(names, vec!["Parcelles", "Routes", "Broken"]);

    let parcelles = report.results[0].metadata.as_ref().unwrap();
    assert_eq!(parcelles.table.as_deref(), Some("parcelles"));
    assert!(parcelles.success());
    assert!(report.results[2].metadata.is_none());

    assert_eq!(
        scalar(
            &fx.destination,
            "SELECT COUNT(*) FROM metadata_field_aliases WHERE table_name = 'parcelles' AND alias = 'Nature du sol'"
        )
        .await,
        1
    );
    assert_eq!(
        scalar(
            &fx.destination,
            "SELECT COUNT(*) FROM metadata_field_aliases WHERE table_name = 'routes'"
        )
        .await,
        1
    );
    assert_eq!(
        scalar(
            &fx.destination,
            "SELECT COUNT(*) FROM metadata_domain_values WHERE table_name = 'parcelles' AND field_name = 'NATURE'"
        )
        .await,
        2
    );
    assert!(report.output_size.is_some());
}

#[tokio::test]
async fn test_rerun_with_overwrite_converges() {
    let fx = fixture();

    for _ in 0..2 {
        let runner = Arc::new(SqlRunner::new(&fx.destination));
        let converter = Converter::new(
            Arc::new(cadastre(&fx.source)),
            &fx.destination,
            runner,
            ConvertOptions::default().overwrite(true),
        );
        assert!(converter.run().await.unwrap().success());
    }

    assert_eq!(
        scalar(&fx.destination, "SELECT COUNT(*) FROM metadata_domain_values").await,
        2
    );
    assert_eq!(
        scalar(&fx.destination, "SELECT COUNT(*) FROM metadata_field_aliases").await,
        2
    );
}

#[tokio::test]
async fn test_no_success_removes_destination() {
    let fx = fixture();
    let runner = Arc::new(
        SqlRunner::new(&fx.destination)
            .failing("Parcelles")
            .failing("Routes")
            .failing("Broken"),
    );
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        runner,
        ConvertOptions::default(),
    );

    let report = converter.run().await.unwrap();

    assert!(!report.success());
    assert_eq!(report.failures().count(), 3);
    assert!(!fx.destination.exists());
}

#[tokio::test]
async fn test_single_layer_selection() {
    let fx = fixture();
    let runner = Arc::new(SqlRunner::new(&fx.destination));
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        runner.clone(),
        ConvertOptions::default()
            .layer("Routes")
            .metadata(MetadataOptions::disabled()),
    );

    let report = converter.run().await.unwrap();

    assert_eq!(report.total(), 1);
    assert!(report.results[0].metadata.is_none());
    assert_eq!(runner.jobs().len(), 1);
    assert_eq!(runner.jobs()[0].mode, WriteMode::Create);
}

#[tokio::test]
async fn test_existing_destination_is_refused_without_overwrite() {
    let fx = fixture();
    std::fs::create_dir_all(fx.destination.parent().unwrap()).unwrap();
    std::fs::write(&fx.destination, b"").unwrap();

    let runner = Arc::new(SqlRunner::new(&fx.destination));
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        runner.clone(),
        ConvertOptions::default(),
    );

    let err = converter.run().await.unwrap_err();
    assert!(matches!(err, ConvertError::DestinationExists(_)));
    assert!(err.is_input_error());
    assert_eq!(runner.availability_checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_source_paths() {
    let fx = fixture();

    let missing = Converter::new(
        Arc::new(cadastre(&fx.source.join("nope.gdb"))),
        &fx.destination,
        Arc::new(SqlRunner::new(&fx.destination)),
        ConvertOptions::default(),
    );
    assert!(matches!(
        missing.run().await,
        Err(ConvertError::SourceMissing(_))
    ));

    let file = fx.source.join("a00000001.gdbtable");
    std::fs::write(&file, b"").unwrap();
    let not_dir = Converter::new(
        Arc::new(cadastre(&file)),
        &fx.destination,
        Arc::new(SqlRunner::new(&fx.destination)),
        ConvertOptions::default(),
    );
    assert!(matches!(
        not_dir.run().await,
        Err(ConvertError::SourceNotDirectory(_))
    ));
}

#[tokio::test]
async fn test_unavailable_converter_is_fatal() {
    let fx = fixture();
    let runner = Arc::new(SqlRunner {
        unavailable: true,
        ..SqlRunner::new(&fx.destination)
    });
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        runner.clone(),
        ConvertOptions::default(),
    );

    assert!(matches!(
        converter.run().await,
        Err(ConvertError::ConverterUnavailable { .. })
    ));
    assert!(runner.jobs().is_empty());
    assert!(!fx.destination.exists());
}

#[tokio::test]
async fn test_fallback_runner_takes_over_when_converter_is_unavailable() {
    let fx = fixture();
    let primary = Arc::new(SqlRunner {
        unavailable: true,
        ..SqlRunner::new(&fx.destination)
    });
    let fallback = Arc::new(SqlRunner::new(&fx.destination).failing("Broken"));
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        primary.clone(),
        ConvertOptions::default(),
    )
    .with_fallback(fallback.clone());

    let report = converter.run().await.unwrap();

    assert!(report.success());
    assert_eq!(report.succeeded(), 2);
    assert_eq!(primary.availability_checks.load(Ordering::SeqCst), 1);
    assert!(primary.jobs().is_empty());
    assert_eq!(fallback.availability_checks.load(Ordering::SeqCst), 1);

    let modes: Vec<_> = fallback.jobs().into_iter().map(|j| j.mode).collect();
    assert_eq!(
        modes,
        vec![WriteMode::Create, WriteMode::Append, WriteMode::Append]
    );
    assert_eq!(
        scalar(&fx.destination, "SELECT COUNT(*) FROM metadata_field_aliases").await,
        2
    );
}

#[tokio::test]
async fn test_available_converter_leaves_fallback_unused() {
    let fx = fixture();
    let primary = Arc::new(SqlRunner::new(&fx.destination));
    let fallback = Arc::new(SqlRunner::new(&fx.destination));
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        primary.clone(),
        ConvertOptions::default(),
    )
    .with_fallback(fallback.clone());

    assert!(converter.run().await.unwrap().success());
    assert_eq!(primary.jobs().len(), 3);
    assert_eq!(fallback.availability_checks.load(Ordering::SeqCst), 0);
    assert!(fallback.jobs().is_empty());
}

#[tokio::test]
async fn test_unavailable_fallback_reports_primary_error() {
    let fx = fixture();
    let unavailable = || {
        Arc::new(SqlRunner {
            unavailable: true,
            ..SqlRunner::new(&fx.destination)
        })
    };
    let fallback = unavailable();
    let converter = Converter::new(
        Arc::new(cadastre(&fx.source)),
        &fx.destination,
        unavailable(),
        ConvertOptions::default(),
    )
    .with_fallback(fallback.clone());

    assert!(matches!(
        converter.run().await,
        Err(ConvertError::ConverterUnavailable { .. })
    ));
    assert_eq!(fallback.availability_checks.load(Ordering::SeqCst), 1);
    assert!(fallback.jobs().is_empty());
    assert!(!fx.destination.exists());
}
