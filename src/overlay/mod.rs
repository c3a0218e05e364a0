//! Overlay tables in the destination file.
//!
//! Recovered metadata that the destination schema cannot represent is kept
//! in two side tables keyed by produced table name:
//!
//! ```sql
//! metadata_field_aliases(table_name, field_name, alias)
//! metadata_domain_values(table_name, field_name, code, description)
//! ```
//!
//! Every write is `INSERT OR REPLACE` on the composite key, so re-running a
//! conversion converges instead of duplicating rows. Each operation opens
//! its own connection and closes it when done; the converter process holds
//! an independent handle to the same file while it runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::CodeMap;
use crate::metadata::LayerMetadata;

const CREATE_ALIASES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metadata_field_aliases (
        table_name TEXT,
        field_name TEXT,
        alias TEXT,
        PRIMARY KEY (table_name, field_name)
    )
"#;

const CREATE_DOMAIN_VALUES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metadata_domain_values (
        table_name TEXT,
        field_name TEXT,
        code INTEGER,
        description TEXT,
        PRIMARY KEY (table_name, field_name, code)
    )
"#;

/// Single-column keys the destination already enforces as row identifier.
const NATIVE_ID_COLUMNS: &[&str] = &["ogc_fid", "fid", "OBJECTID"];

/// Longest generated index name.
const MAX_INDEX_NAME_LEN: usize = 50;

/// Post-run PRAGMAs.
const DEFAULT_PRAGMAS: &[&str] = &[
    "PRAGMA synchronous = NORMAL",
    "PRAGMA journal_mode = WAL",
    "PRAGMA cache_size = -256000",
    "PRAGMA temp_store = MEMORY",
];

/// Post-run PRAGMAs trading durability for speed.
const FAST_PRAGMAS: &[&str] = &[
    "PRAGMA synchronous = OFF",
    "PRAGMA journal_mode = OFF",
    "PRAGMA cache_size = -512000",
    "PRAGMA temp_store = MEMORY",
];

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("{failed} of {total} trigger statements failed")]
    Triggers { failed: usize, total: usize },
}

/// Per-category result of applying one layer's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayOutcome {
    /// Destination table the metadata was applied to, if it was found.
    pub table: Option<String>,
    pub aliases: bool,
    pub domains: bool,
    pub primary_keys: bool,
    pub triggers: bool,
}

impl OverlayOutcome {
    /// True when the table was found and every category was applied.
    pub fn success(&self) -> bool {
        self.table.is_some() && self.aliases && self.domains && self.primary_keys && self.triggers
    }
}

/// Writer for the overlay tables of one destination file.
#[derive(Debug, Clone)]
pub struct OverlayStore {
    path: PathBuf,
}

impl OverlayStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, sqlx::Error> {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30))
            .connect()
            .await
    }

    /// Create both overlay tables if missing.
    pub async fn ensure_schema(&self) -> Result<(), OverlayError> {
        let mut conn = self.connect().await?;
        sqlx::query(CREATE_ALIASES_TABLE).execute(&mut conn).await?;
        sqlx::query(CREATE_DOMAIN_VALUES_TABLE)
            .execute(&mut conn)
            .await?;
        conn.close().await?;
        Ok(())
    }

    /// Name under which the converter stored `layer`.
    ///
    /// Tries the layer name as is, lowercase, uppercase, then with `-` and
    /// spaces replaced by `_`.
    pub async fn resolve_table_name(&self, layer: &str) -> Result<Option<String>, OverlayError> {
        let mut conn = self.connect().await?;
        let mut found = None;

        for candidate in table_name_candidates(layer) {
            let name: Option<String> = sqlx::query_scalar(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(&candidate)
            .fetch_optional(&mut conn)
            .await?;

            if name.is_some() {
                found = name;
                break;
            }
        }

        conn.close().await?;
        Ok(found)
    }

    /// Upsert `field -> alias` rows for `table`. Returns the rows written.
    pub async fn apply_field_aliases(
        &self,
        table: &str,
        aliases: &BTreeMap<String, String>,
    ) -> Result<usize, OverlayError> {
        if aliases.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await?;
        for (field, alias) in aliases {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO metadata_field_aliases (table_name, field_name, alias)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(table)
            .bind(field)
            .bind(alias)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        conn.close().await?;

        info!(table, aliases = aliases.len(), "Field aliases applied");
        Ok(aliases.len())
    }

    /// Upsert `field -> code -> description` rows for `table`. Returns the
    /// rows written.
    pub async fn apply_domain_values(
        &self,
        table: &str,
        domains: &BTreeMap<String, CodeMap>,
    ) -> Result<usize, OverlayError> {
        if domains.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await?;
        let mut written = 0;
        for (field, values) in domains {
            for (code, description) in values {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO metadata_domain_values
                        (table_name, field_name, code, description)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(table)
                .bind(field)
                .bind(code)
                .bind(description)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }
        tx.commit().await?;
        conn.close().await?;

        info!(table, values = written, fields = domains.len(), "Domain values applied");
        Ok(written)
    }

    /// Enforce `columns` as a unique key on `table`.
    ///
    /// A lone native row identifier is already enforced and is left alone.
    pub async fn apply_primary_keys(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<(), OverlayError> {
        if columns.is_empty() {
            return Ok(());
        }

        let mut conn = self.connect().await?;
        let exists: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&mut conn)
                .await?;
        if exists.is_none() {
            conn.close().await?;
            return Err(OverlayError::TableNotFound(table.to_string()));
        }

        if let [column] = columns {
            if NATIVE_ID_COLUMNS.contains(&column.as_str()) {
                conn.close().await?;
                debug!(table, column = %column, "Primary key already enforced");
                return Ok(());
            }
        }

        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&index_name(table, columns)),
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        sqlx::query(&sql).execute(&mut conn).await?;
        conn.close().await?;

        info!(table, columns = %columns.join(", "), "Primary key applied");
        Ok(())
    }

    /// Execute trigger statements one by one. Fails if any statement fails.
    pub async fn apply_triggers(&self, table: &str, triggers: &[String]) -> Result<(), OverlayError> {
        if triggers.is_empty() {
            return Ok(());
        }

        let mut conn = self.connect().await?;
        let mut failed = 0;
        for statement in triggers {
            if let Err(e) = sqlx::query(statement).execute(&mut conn).await {
                debug!(table, error = %e, "Trigger statement failed");
                failed += 1;
            }
        }
        conn.close().await?;

        let applied = triggers.len() - failed;
        if applied > 0 {
            info!(table, triggers = applied, "Triggers applied");
        }
        if failed > 0 {
            return Err(OverlayError::Triggers {
                failed,
                total: triggers.len(),
            });
        }
        Ok(())
    }

    /// Apply every category of `metadata` to `table`. The overlay tables are
    /// created first, whether or not there is anything to write.
    pub async fn apply(&self, table: &str, metadata: &LayerMetadata) -> OverlayOutcome {
        if let Err(e) = self.ensure_schema().await {
            warn!(table, error = %e, "Failed to create overlay tables");
        }

        OverlayOutcome {
            table: Some(table.to_string()),
            aliases: report(
                table,
                "field aliases",
                self.apply_field_aliases(table, &metadata.field_aliases).await,
            ),
            domains: report(
                table,
                "domain values",
                self.apply_domain_values(table, &metadata.domain_values).await,
            ),
            primary_keys: report(
                table,
                "primary keys",
                self.apply_primary_keys(table, &metadata.primary_keys).await,
            ),
            triggers: report(
                table,
                "triggers",
                self.apply_triggers(table, &metadata.triggers).await,
            ),
        }
    }

    /// Find the table produced for `layer` and apply `metadata` to it.
    pub async fn apply_layer(&self, layer: &str, metadata: &LayerMetadata) -> OverlayOutcome {
        if let Err(e) = self.ensure_schema().await {
            warn!(layer, error = %e, "Failed to create overlay tables");
        }

        match self.resolve_table_name(layer).await {
            Ok(Some(table)) => self.apply(&table, metadata).await,
            Ok(None) => {
                warn!(layer, "Table not found in destination, metadata not applied");
                OverlayOutcome::default()
            }
            Err(e) => {
                warn!(layer, error = %e, "Failed to look up destination table");
                OverlayOutcome::default()
            }
        }
    }

    /// Tune the destination for reading and refresh planner statistics.
    /// Individual statement failures are logged and skipped.
    pub async fn optimize(&self, fast_mode: bool) -> Result<(), OverlayError> {
        let pragmas = if fast_mode {
            info!("Applying aggressive tuning (no journal, no fsync)");
            FAST_PRAGMAS
        } else {
            DEFAULT_PRAGMAS
        };

        let mut conn = self.connect().await?;
        for statement in pragmas.iter().chain(&["ANALYZE"]) {
            if let Err(e) = sqlx::query(statement).execute(&mut conn).await {
                debug!(statement, error = %e, "Tuning statement failed");
            }
        }
        conn.close().await?;

        info!(destination = %self.path.display(), "Destination tuned");
        Ok(())
    }
}

fn report<T>(table: &str, category: &str, result: Result<T, OverlayError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            warn!(table, category, error = %e, "Failed to apply metadata");
            false
        }
    }
}

/// Candidate destination names for `layer`, in lookup order, without
/// duplicates.
pub fn table_name_candidates(layer: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(5);
    for candidate in [
        layer.to_string(),
        layer.to_lowercase(),
        layer.to_uppercase(),
        layer.replace('-', "_"),
        layer.replace(' ', "_"),
    ] {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Unique index name for a key: `pk_<table>_<columns>`, restricted to
/// `[A-Za-z0-9_]` and capped in length.
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("pk_{table}_{}", columns.join("_"))
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_INDEX_NAME_LEN)
        .collect()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
