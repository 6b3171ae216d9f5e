//! Database transfer engine.
//!
//! Emits the source database as a portable SQL stream, one bounded slice
//! per request. Every statement is idempotent on the destination: CREATE
//! TABLE IF NOT EXISTS once per table, then INSERT IGNORE rows, so a
//! replayed slice cannot duplicate data.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::ServeContext;
use crate::enumerate::TableEnumerator;
use crate::error::{MigrateError, Result};
use crate::source::{RowExclusion, SourceDb, SqlRow, SqlValue};
use crate::store::{TableStatus, TrackingStore, FILES_TABLE, OPTIONS_TABLE, TABLES_TABLE};

/// Outcome of one database-serving request.
#[derive(Debug)]
pub struct DbServeOutcome {
    /// SQL payload for this slice; empty when the phase is complete.
    pub sql: String,
    /// Table the slice came from.
    pub table_name: Option<String>,
    /// Rows rendered in this slice.
    pub rows: usize,
    /// Whether every table has been fully served.
    pub complete: bool,
    /// Percentage complete across the whole database phase.
    pub progress: f64,
}

/// Drives the database side of the migration.
pub struct DbTransferEngine {
    store: Arc<dyn TrackingStore>,
    source: Arc<dyn SourceDb>,
    slice_rows: i64,
}

impl DbTransferEngine {
    /// Build from a context that has a source database attached.
    pub fn new(ctx: &ServeContext) -> Result<Self> {
        let source = ctx
            .source
            .clone()
            .ok_or_else(|| MigrateError::precondition("no source database configured"))?;
        Ok(Self {
            store: ctx.store.clone(),
            source,
            slice_rows: ctx.config.transfer.db_slice_rows,
        })
    }

    /// Serve one slice of the database phase.
    ///
    /// Enumerates tables on the first call, then resumes the in-progress
    /// table (or starts the next untouched one) at its persisted offset.
    pub async fn serve_slice(&self) -> Result<DbServeOutcome> {
        self.enumerate_if_empty().await?;

        let table = match self.pick_table().await? {
            Some(table) => table,
            None => {
                return Ok(DbServeOutcome {
                    sql: String::new(),
                    table_name: None,
                    rows: 0,
                    complete: true,
                    progress: 100.0,
                });
            }
        };

        let settings = self.store.migrate_settings().await?;
        let exclusions = settings
            .excluded_tables_rows
            .get(&table.table_name)
            .map(|entries| RowExclusion::parse_list(entries))
            .unwrap_or_default();

        let mut sql = String::new();
        if table.offset == 0 {
            sql.push_str(&idempotent_create(
                &self.source.create_table_sql(&table.table_name).await?,
            ));
            sql.push_str(";\n");
        }

        let rows = self
            .source
            .fetch_slice(&table.table_name, table.offset, self.slice_rows, &exclusions)
            .await?;
        for row in &rows {
            sql.push_str(&render_insert(&table.table_name, row));
        }

        let fetched = rows.len() as i64;
        let status = if fetched < self.slice_rows {
            TableStatus::Complete
        } else {
            TableStatus::InProgress
        };
        self.store
            .update_table_progress(&table.table_name_hash, table.offset + fetched, status)
            .await?;

        if status == TableStatus::Complete {
            info!(table = %table.table_name, "table fully served");
        } else {
            debug!(table = %table.table_name, offset = table.offset, fetched, "slice served");
        }

        Ok(DbServeOutcome {
            sql,
            table_name: Some(table.table_name),
            rows: rows.len(),
            complete: false,
            progress: self.progress().await?,
        })
    }

    async fn enumerate_if_empty(&self) -> Result<()> {
        if self.store.count_tables().await? > 0 {
            return Ok(());
        }
        let settings = self.store.migrate_settings().await?;
        let mut excluded = settings.excluded_tables.clone();
        excluded.extend([
            FILES_TABLE.to_string(),
            TABLES_TABLE.to_string(),
            OPTIONS_TABLE.to_string(),
        ]);
        TableEnumerator::new(self.store.clone(), self.source.clone())
            .run_once(&excluded)
            .await?;
        Ok(())
    }

    /// In-progress table first, so a restart resumes where it stopped.
    async fn pick_table(&self) -> Result<Option<crate::store::TableRecord>> {
        if let Some(table) = self
            .store
            .first_table_with_status(TableStatus::InProgress)
            .await?
        {
            return Ok(Some(table));
        }
        self.store
            .first_table_with_status(TableStatus::NotStarted)
            .await
    }

    /// Average of table completion and row completion, so many small
    /// finished tables and one huge half-done one both move the number.
    async fn progress(&self) -> Result<f64> {
        let tables = self.store.all_tables().await?;
        if tables.is_empty() {
            return Ok(0.0);
        }
        let complete = tables
            .iter()
            .filter(|t| t.status == TableStatus::Complete)
            .count() as f64;
        let table_pct = complete / tables.len() as f64 * 100.0;

        let rows_total: i64 = tables.iter().map(|t| t.rows_total).sum();
        let rows_done: i64 = tables.iter().map(|t| t.offset.min(t.rows_total)).sum();
        let row_pct = if rows_total > 0 {
            rows_done as f64 / rows_total as f64 * 100.0
        } else {
            100.0
        };

        Ok((((table_pct + row_pct) / 2.0) * 100.0).round() / 100.0)
    }
}

/// A replayed first slice must not fail on an existing table.
fn idempotent_create(sql: &str) -> String {
    match sql.strip_prefix("CREATE TABLE ") {
        Some(rest) if !rest.starts_with("IF NOT EXISTS") => {
            format!("CREATE TABLE IF NOT EXISTS {rest}")
        }
        _ => sql.to_string(),
    }
}

/// Render one row as an idempotent INSERT IGNORE statement.
fn render_insert(table: &str, row: &SqlRow) -> String {
    let columns = row
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let values = row
        .iter()
        .map(|(_, value)| render_value(value))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT IGNORE INTO {} ({}) VALUES ({});\n",
        quote_ident(table),
        columns,
        values
    )
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render one value as a SQL literal.
///
/// Text is emitted unquoted only when it is numeric without a leading
/// zero, so zero-padded identifiers keep their padding on the
/// destination. Binary columns become hex literals to keep the stream
/// valid UTF-8.
fn render_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Uint(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Text(s) => {
            if is_plain_numeric(s) && !s.starts_with('0') {
                s.clone()
            } else {
                format!("'{}'", escape_string(s))
            }
        }
        SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
    }
}

/// Bare-token test for text values: must start like a number and parse to
/// a finite float. Words `f64::from_str` also accepts, such as `inf`,
/// `Infinity`, and `NaN`, are not valid SQL tokens and stay quoted.
fn is_plain_numeric(s: &str) -> bool {
    let first = match s.chars().next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_digit() && !matches!(first, '-' | '+' | '.') {
        return false;
    }
    s.parse::<f64>().map_or(false, |v| v.is_finite())
}

/// Escape a string for a single-quoted MySQL literal.
fn escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig, SiteConfig, TransferConfig};
    use crate::source::{MemorySource, MemoryTable};
    use crate::store::MemoryStore;

    fn test_config(slice_rows: i64) -> Config {
        Config {
            site: SiteConfig {
                root: "/tmp/site".into(),
            },
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 3306,
                database: "test".into(),
                user: "test".into(),
                password: "test".into(),
            },
            transfer: TransferConfig {
                db_slice_rows: slice_rows,
                ..TransferConfig::default()
            },
        }
    }

    fn posts_table(rows: usize) -> MemoryTable {
        MemoryTable {
            name: "wp_posts".to_string(),
            create_sql: "CREATE TABLE IF NOT EXISTS `wp_posts` (`id` bigint, `title` text)"
                .to_string(),
            rows: (0..rows)
                .map(|i| {
                    vec![
                        ("id".to_string(), SqlValue::Int(i as i64)),
                        ("title".to_string(), SqlValue::Text(format!("post {i}"))),
                    ]
                })
                .collect(),
        }
    }

    fn engine(source: MemorySource, slice_rows: i64, store: Arc<MemoryStore>) -> DbTransferEngine {
        let ctx = ServeContext::new(test_config(slice_rows), store, Some(Arc::new(source)), None);
        DbTransferEngine::new(&ctx).unwrap()
    }

    #[tokio::test]
    async fn schema_is_emitted_only_on_the_first_slice() {
        let store = Arc::new(MemoryStore::new());
        let e = engine(
            MemorySource::new().with_table(posts_table(5)),
            2,
            store.clone(),
        );

        let first = e.serve_slice().await.unwrap();
        assert!(first.sql.starts_with("CREATE TABLE IF NOT EXISTS `wp_posts`"));
        assert_eq!(first.rows, 2);
        assert!(!first.complete);

        let second = e.serve_slice().await.unwrap();
        assert!(!second.sql.contains("CREATE TABLE"));
        assert_eq!(second.rows, 2);
        assert!(second.sql.contains("'post 2'"));

        let third = e.serve_slice().await.unwrap();
        assert_eq!(third.rows, 1);

        let done = e.serve_slice().await.unwrap();
        assert!(done.complete);
        assert_eq!(done.progress, 100.0);
        assert!(done.sql.is_empty());
    }

    #[tokio::test]
    async fn short_slice_marks_the_table_complete() {
        let store = Arc::new(MemoryStore::new());
        let e = engine(
            MemorySource::new().with_table(posts_table(3)),
            100,
            store.clone(),
        );

        let outcome = e.serve_slice().await.unwrap();
        assert_eq!(outcome.rows, 3);
        assert!(!outcome.complete);
        assert_eq!(
            store
                .count_tables_with_status(TableStatus::Complete)
                .await
                .unwrap(),
            1
        );
        assert!(e.serve_slice().await.unwrap().complete);
    }

    #[tokio::test]
    async fn progress_averages_tables_and_rows() {
        let store = Arc::new(MemoryStore::new());
        let source = MemorySource::new()
            .with_table(posts_table(2))
            .with_table(MemoryTable {
                name: "wp_users".to_string(),
                create_sql: "CREATE TABLE IF NOT EXISTS `wp_users` (`id` bigint)".to_string(),
                rows: (0..2)
                    .map(|i| vec![("id".to_string(), SqlValue::Int(i))])
                    .collect(),
            });
        let e = engine(source, 100, store.clone());

        // First call finishes wp_posts: half the tables, half the rows.
        let outcome = e.serve_slice().await.unwrap();
        assert_eq!(outcome.table_name.as_deref(), Some("wp_posts"));
        assert_eq!(outcome.progress, 50.0);

        let outcome = e.serve_slice().await.unwrap();
        assert_eq!(outcome.table_name.as_deref(), Some("wp_users"));
        assert_eq!(outcome.progress, 100.0);
    }

    #[tokio::test]
    async fn ledger_tables_are_never_served() {
        let store = Arc::new(MemoryStore::new());
        let source = MemorySource::new()
            .with_table(posts_table(1))
            .with_table(MemoryTable {
                name: FILES_TABLE.to_string(),
                create_sql: format!("CREATE TABLE `{FILES_TABLE}` (`id` bigint)"),
                rows: vec![],
            });
        let e = engine(source, 100, store.clone());

        e.serve_slice().await.unwrap();
        assert!(e.serve_slice().await.unwrap().complete);
        assert_eq!(store.count_tables().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn row_exclusions_filter_rendered_rows() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(
                crate::store::OPT_MIGRATE_SETTINGS,
                r#"{"excluded_tables_rows":{"wp_posts":["title:post 1"]}}"#,
            )
            .await
            .unwrap();
        let e = engine(MemorySource::new().with_table(posts_table(3)), 100, store);

        let outcome = e.serve_slice().await.unwrap();
        assert_eq!(outcome.rows, 2);
        assert!(!outcome.sql.contains("'post 1'"));
        assert!(outcome.sql.contains("'post 2'"));
    }

    #[test]
    fn create_statements_are_made_idempotent() {
        assert_eq!(
            idempotent_create("CREATE TABLE `wp_posts` (`id` bigint)"),
            "CREATE TABLE IF NOT EXISTS `wp_posts` (`id` bigint)"
        );
        let already = "CREATE TABLE IF NOT EXISTS `wp_posts` (`id` bigint)";
        assert_eq!(idempotent_create(already), already);
    }

    #[test]
    fn renders_idempotent_inserts() {
        let row: SqlRow = vec![
            ("id".to_string(), SqlValue::Int(7)),
            ("name".to_string(), SqlValue::Text("it's".to_string())),
        ];
        assert_eq!(
            render_insert("wp_posts", &row),
            "INSERT IGNORE INTO `wp_posts` (`id`, `name`) VALUES (7, 'it\\'s');\n"
        );
    }

    #[test]
    fn value_rendering_rules() {
        assert_eq!(render_value(&SqlValue::Null), "NULL");
        assert_eq!(render_value(&SqlValue::Int(-3)), "-3");
        assert_eq!(render_value(&SqlValue::Uint(18446744073709551615)), "18446744073709551615");
        assert_eq!(render_value(&SqlValue::Text("42".into())), "42");
        assert_eq!(render_value(&SqlValue::Text("4.5".into())), "4.5");
        // Zero-padded numerics keep their padding via quoting.
        assert_eq!(render_value(&SqlValue::Text("007".into())), "'007'");
        assert_eq!(render_value(&SqlValue::Text("0".into())), "'0'");
        assert_eq!(render_value(&SqlValue::Text("hello".into())), "'hello'");
        assert_eq!(
            render_value(&SqlValue::Bytes(vec![0xde, 0xad])),
            "X'dead'"
        );
    }

    #[test]
    fn float_lookalike_words_stay_quoted() {
        assert_eq!(
            render_value(&SqlValue::Text("Infinity".into())),
            "'Infinity'"
        );
        assert_eq!(render_value(&SqlValue::Text("inf".into())), "'inf'");
        assert_eq!(render_value(&SqlValue::Text("-inf".into())), "'-inf'");
        assert_eq!(render_value(&SqlValue::Text("NaN".into())), "'NaN'");
        assert_eq!(render_value(&SqlValue::Text("nan".into())), "'nan'");
        // Overflowing exponents parse to infinity; they are not numbers.
        assert_eq!(render_value(&SqlValue::Text("1e400".into())), "'1e400'");
        assert_eq!(render_value(&SqlValue::Text("1e3".into())), "1e3");
    }

    #[test]
    fn escapes_control_and_quote_characters() {
        assert_eq!(escape_string("a'b"), "a\\'b");
        assert_eq!(escape_string("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_string("back\\slash"), "back\\\\slash");
        assert_eq!(escape_string("nul\0byte"), "nul\\0byte");
    }
}
