//! End-to-end run against a stand-in converter executable
//!
//! The stand-in answers `--version`, logs its arguments and creates an empty
//! destination file (a valid, empty SQLite database). Kept in its own test
//! binary so no other test forks while the script is being written.
//!
//! Run with: cargo test --test fake_converter

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::tempdir;

use gdb2spatialite::{
    ConvertOptions, Converter, FieldDefinition, MemorySource, Ogr2OgrRunner, ProcessSupervisor,
    SupervisorConfig,
};

fn write_converter(dir: &Path, log: &Path) -> std::path::PathBuf {
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "GDAL 3.8.4, released 2024/02/08"
    exit 0
fi
echo "$@" >> "{log}"
while [ $# -gt 0 ]; do
    if [ "$1" = "-nln" ]; then
        shift 2
        [ -f "$1" ] || : > "$1"
        break
    fi
    shift
done
echo "0...10...20...30...40...50...60...70...80...90...100 - done."
echo "Warning 1: Field name normalized" >&2
"#,
        log = log.display()
    );

    let path = dir.join("ogr2ogr");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_two_layers_with_stand_in_converter() {
    let dir = tempdir().unwrap();
    let source_path = dir.path().join("Cadastre.gdb");
    std::fs::create_dir(&source_path).unwrap();
    let destination = dir.path().join("cadastre.sqlite");
    let log = dir.path().join("converter.log");
    let program = write_converter(dir.path(), &log);

    let source = MemorySource::new(&source_path)
        .with_layer("Routes", vec![FieldDefinition::new("NOM").with_alias("Nom")])
        .with_row([("NOM", "A7")])
        .with_layer("Parcelles", vec![FieldDefinition::new("NATURE")]);

    let runner = Ogr2OgrRunner::new(&source_path, &destination)
        .with_program(&program)
        .with_supervisor(ProcessSupervisor::new(SupervisorConfig::default()));
    let converter = Converter::new(
        Arc::new(source),
        &destination,
        Arc::new(runner),
        ConvertOptions::default().workers(4),
    );

    let report = converter.run().await.unwrap();

    assert!(report.success());
    assert_eq!(report.workers, 1);
    assert_eq!(report.succeeded(), 2);
    for result in &report.results {
        assert_eq!(result.output_lines, 2);
        // The stand-in creates no layer table, so there is nothing to attach
        // metadata to.
        let outcome = result.metadata.as_ref().unwrap();
        assert!(outcome.table.is_none());
    }

    let calls = std::fs::read_to_string(&log).unwrap();
    let calls: Vec<_> = calls.lines().collect();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains("-nln Routes"));
    assert!(!calls[0].contains("-update"));
    assert!(calls[1].contains("-nln Parcelles"));
    assert!(calls[1].contains("-update"));

    let mut conn = SqliteConnectOptions::new()
        .filename(&destination)
        .connect()
        .await
        .unwrap();
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'metadata_%' ORDER BY name",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();

    assert_eq!(tables, vec!["metadata_domain_values", "metadata_field_aliases"]);
}
