//! MySQL source database reader.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::info;

use super::{RowExclusion, SourceDb, SourceTable, SqlRow, SqlValue};
use crate::config::DatabaseConfig;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL source reader.
pub struct MysqlSource {
    pool: MySqlPool,
}

impl MysqlSource {
    /// Connect a new pool from configuration.
    pub async fn connect(config: &DatabaseConfig, max_conns: u32) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!(
            "Connected to source database: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool (shared with the tracking store).
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Quote a MySQL identifier, doubling embedded backticks.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Decode one column of a result row into a portable value.
///
/// The statement is prepared, so values arrive in the binary protocol and
/// must be decoded by declared type rather than read as raw text.
fn decode_value(row: &MySqlRow, index: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" => SqlValue::Int(row.try_get::<bool, _>(index)? as i64),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => SqlValue::Uint(row.try_get::<u64, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            SqlValue::Int(row.try_get::<i64, _>(index)?)
        }
        "FLOAT" => SqlValue::Float(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => SqlValue::Float(row.try_get::<f64, _>(index)?),
        "DATE" => SqlValue::Text(
            row.try_get::<chrono::NaiveDate, _>(index)?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        "TIME" => SqlValue::Text(
            row.try_get::<chrono::NaiveTime, _>(index)?
                .format("%H:%M:%S")
                .to_string(),
        ),
        "DATETIME" => SqlValue::Text(
            row.try_get::<chrono::NaiveDateTime, _>(index)?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        "TIMESTAMP" => SqlValue::Text(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        "JSON" => SqlValue::Text(row.try_get::<serde_json::Value, _>(index)?.to_string()),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            SqlValue::Bytes(row.try_get::<Vec<u8>, _>(index)?)
        }
        // DECIMAL, CHAR, VARCHAR, TEXT variants, ENUM, SET
        _ => SqlValue::Text(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

#[async_trait]
impl SourceDb for MysqlSource {
    async fn list_tables(&self) -> Result<Vec<SourceTable>> {
        let names: Vec<String> = sqlx::query(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<std::result::Result<_, _>>()?;

        // TABLE_ROWS in information_schema is approximate for InnoDB;
        // progress math needs exact counts.
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let row = sqlx::query(&format!(
                "SELECT COUNT(*) AS n FROM {}",
                quote_ident(&name)
            ))
            .fetch_one(&self.pool)
            .await?;
            tables.push(SourceTable {
                name,
                rows: row.try_get("n")?,
            });
        }
        Ok(tables)
    }

    async fn create_table_sql(&self, table: &str) -> Result<String> {
        let row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        // Column 1 is "Create Table".
        Ok(row.try_get::<String, _>(1)?)
    }

    async fn fetch_slice(
        &self,
        table: &str,
        offset: i64,
        limit: i64,
        exclusions: &[RowExclusion],
    ) -> Result<Vec<SqlRow>> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(table));

        let mut conditions = Vec::new();
        for exclusion in exclusions {
            conditions.push(format!("{} != ?", quote_ident(&exclusion.column)));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));

        let mut query = sqlx::query(&sql);
        for exclusion in exclusions {
            query = query.bind(&exclusion.value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values: SqlRow = Vec::with_capacity(row.columns().len());
            for (index, column) in row.columns().iter().enumerate() {
                let value = decode_value(row, index).map_err(|e| {
                    MigrateError::transfer(
                        format!("{table}.{}", column.name()),
                        format!("could not decode column: {e}"),
                    )
                })?;
                values.push((column.name().to_string(), value));
            }
            result.push(values);
        }
        Ok(result)
    }
}
