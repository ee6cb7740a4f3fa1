//! # Database Module
//!
//! SQLx database connectivity for PostgreSQL and SQLite, and the registry of
//! named connections that controllers query through.
//!
//! Each named database gets exactly one connection, opened when the registry
//! is built and kept for the lifetime of the process.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, error, info};

/// Database handle supporting multiple backends
#[derive(Clone, Debug)]
pub enum DatabasePool {
    /// SQLite connection
    Sqlite(SqlitePool),
    /// PostgreSQL connection
    Postgres(PgPool),
}

impl DatabasePool {
    /// Connect to whichever backend the URL names
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the scheme is unknown or the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Self::connect_sqlite(url).await
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url).await
        } else {
            Err(Error::Database {
                message: format!("Unsupported database URL: {url}"),
            })
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = DatabasePool::connect_sqlite("sqlite::memory:").await?;
    /// let db = DatabasePool::connect_sqlite("sqlite:app.db?mode=rwc").await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_sqlite(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("SQLite connection failed: {e}"),
            })?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_postgres(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("PostgreSQL connection failed: {e}"),
            })?;

        Ok(Self::Postgres(pool))
    }

    /// Execute a statement that doesn't return rows (UPDATE, DELETE, DDL)
    ///
    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryFailed` with the engine message and the SQL.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql, "execute");
        let affected = match self {
            Self::Sqlite(pool) => sqlx::query(sql).execute(pool).await.map(|r| r.rows_affected()),
            Self::Postgres(pool) => sqlx::query(sql).execute(pool).await.map(|r| r.rows_affected()),
        };
        affected.map_err(|e| query_failed(&e, sql))
    }

    /// Execute an INSERT and return the id of the new row
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryFailed` with the engine message and the SQL.
    pub async fn insert(&self, sql: &str) -> Result<i64> {
        debug!(sql, "insert");
        match self {
            Self::Sqlite(pool) => sqlx::query(sql)
                .execute(pool)
                .await
                .map(|r| r.last_insert_rowid())
                .map_err(|e| query_failed(&e, sql)),
            Self::Postgres(pool) => {
                let mut conn = pool.acquire().await.map_err(|e| query_failed(&e, sql))?;
                sqlx::query(sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| query_failed(&e, sql))?;
                sqlx::query_scalar::<_, i64>("SELECT lastval()")
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| query_failed(&e, sql))
            }
        }
    }

    /// Fetch all rows from a query
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryFailed` with the engine message and the SQL.
    pub async fn fetch_all(&self, sql: &str) -> Result<Vec<Record>> {
        debug!(sql, "fetch_all");
        match self {
            Self::Sqlite(pool) => {
                let rows: Vec<SqliteRow> = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| query_failed(&e, sql))?;

                Ok(rows.iter().map(sqlite_row_to_record).collect())
            }
            Self::Postgres(pool) => {
                let rows: Vec<PgRow> = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| query_failed(&e, sql))?;

                Ok(rows.iter().map(pg_row_to_record).collect())
            }
        }
    }

    /// Escape a string for inclusion inside a single-quoted SQL literal
    #[must_use]
    pub fn escape(&self, value: &str) -> String {
        value.replace('\0', "").replace('\'', "''")
    }

    /// Quote an identifier, keeping `schema.table` style dots as separators
    #[must_use]
    pub fn quote_ident(&self, name: &str) -> String {
        name.split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    format!("\"{}\"", part.replace('"', "\"\""))
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a table reference, leaving a trailing alias (`users u`) bare
    #[must_use]
    pub fn quote_table(&self, table: &str) -> String {
        let mut parts = table.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let alias: Vec<&str> = parts.collect();
        if alias.is_empty() {
            self.quote_ident(name)
        } else {
            format!("{} {}", self.quote_ident(name), alias.join(" "))
        }
    }

    /// Render a value as an inline SQL literal for this backend
    #[must_use]
    pub fn literal(&self, value: &DbValue) -> String {
        match value {
            DbValue::Null => "NULL".to_string(),
            DbValue::Int(i) => i.to_string(),
            DbValue::Float(f) if f.is_finite() => f.to_string(),
            DbValue::Float(_) => "NULL".to_string(),
            DbValue::String(s) => format!("'{}'", self.escape(s)),
            DbValue::Bool(b) => match self {
                Self::Sqlite(_) => String::from(if *b { "1" } else { "0" }),
                Self::Postgres(_) => String::from(if *b { "TRUE" } else { "FALSE" }),
            },
            DbValue::Bytes(bytes) => {
                let hex = bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
                    let _ = write!(acc, "{b:02x}");
                    acc
                });
                match self {
                    Self::Sqlite(_) => format!("X'{hex}'"),
                    Self::Postgres(_) => format!("'\\x{hex}'::bytea"),
                }
            }
        }
    }

    /// Close the connection
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

fn query_failed(err: &sqlx::Error, sql: &str) -> Error {
    let message = match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    Error::QueryFailed {
        message,
        sql: sql.to_string(),
    }
}

/// Column value read from or written to the database
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Serialize for DbValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Bytes(b) => serializer.serialize_bytes(b),
        }
    }
}

impl DbValue {
    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for DbValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for DbValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for DbValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| n.as_f64().map_or(Self::Null, Self::Float), Self::Int),
            Value::String(s) => Self::String(s),
            other => Self::String(other.to_string()),
        }
    }
}

/// One result row: column name to value, in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, DbValue)>,
}

impl Record {
    /// Value of a column, if present
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    /// Whether the row has this column
    #[must_use]
    pub fn contains_key(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in select order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn push(&mut self, name: String, value: DbValue) {
        self.columns.push((name, value));
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn sqlite_row_to_record(row: &SqliteRow) -> Record {
    let mut record = Record::default();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();

        // Expression columns have no declared type, so decode by the value's storage class
        let value = match row.try_get_raw(i) {
            Ok(raw) if !raw.is_null() => match raw.type_info().name() {
                "INTEGER" => row.try_get::<i64, _>(i).map(DbValue::Int).ok(),
                "REAL" => row.try_get::<f64, _>(i).map(DbValue::Float).ok(),
                "BLOB" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes).ok(),
                _ => row
                    .try_get::<String, _>(i)
                    .map(DbValue::String)
                    .or_else(|_| row.try_get::<i64, _>(i).map(DbValue::Int))
                    .or_else(|_| row.try_get::<f64, _>(i).map(DbValue::Float))
                    .ok(),
            },
            _ => None,
        };

        record.push(name, value.unwrap_or(DbValue::Null));
    }

    record
}

fn pg_row_to_record(row: &PgRow) -> Record {
    let mut record = Record::default();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let value = match type_name {
            "INT2" => row.try_get::<i16, _>(i).map(|v| DbValue::Int(v.into())).ok(),
            "INT4" => row.try_get::<i32, _>(i).map(|v| DbValue::Int(v.into())).ok(),
            "INT8" => row.try_get::<i64, _>(i).map(DbValue::Int).ok(),
            "FLOAT4" => row.try_get::<f32, _>(i).map(|v| DbValue::Float(v.into())).ok(),
            "FLOAT8" => row.try_get::<f64, _>(i).map(DbValue::Float).ok(),
            "BOOL" => row.try_get::<bool, _>(i).map(DbValue::Bool).ok(),
            "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes).ok(),
            _ => row.try_get::<String, _>(i).map(DbValue::String).ok(),
        };

        record.push(name, value.unwrap_or(DbValue::Null));
    }

    record
}

/// Named database connections
///
/// Built once at startup. A name whose connection failed stays listed so the
/// default can still resolve to it, but lookups for it fail.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    names: Vec<String>,
    connections: HashMap<String, DatabasePool>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every configured connection
    ///
    /// Connection failures are logged and leave that name without a handle.
    pub async fn connect(config: &DatabaseConfig) -> Self {
        let mut registry = Self::new();

        for conn in &config.connections {
            registry.names.push(conn.name.clone());
            match DatabasePool::connect(&conn.url).await {
                Ok(pool) => {
                    info!(name = %conn.name, "Database connection opened");
                    registry.connections.insert(conn.name.clone(), pool);
                }
                Err(e) => {
                    error!(name = %conn.name, error = %e, "Connection failed");
                }
            }
        }

        registry
    }

    /// Register an already-open handle under `name`
    pub fn insert(&mut self, name: impl Into<String>, pool: DatabasePool) {
        let name = name.into();
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        self.connections.insert(name, pool);
    }

    /// Look up a handle by name
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionNotFound` if no open connection has that name.
    pub fn get(&self, name: &str) -> Result<&DatabasePool> {
        self.connections.get(name).ok_or_else(|| {
            error!(name, "No connection available");
            Error::ConnectionNotFound {
                name: name.to_string(),
            }
        })
    }

    /// The handle for the first configured name
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when no names are configured, or
    /// `Error::ConnectionNotFound` when the first one failed to open.
    pub fn default_connection(&self) -> Result<&DatabasePool> {
        let name = self.names.first().ok_or_else(|| Error::Config {
            message: "No DB name provided and DB_CONNECTIONS is not set".to_string(),
        })?;
        self.get(name)
    }

    /// A fresh query builder on the named connection
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionRegistry::get`].
    pub fn query(&self, name: &str) -> Result<QueryBuilder> {
        self.get(name).map(|pool| QueryBuilder::new(pool.clone()))
    }

    /// A fresh query builder on the default connection
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionRegistry::default_connection`].
    pub fn default_query(&self) -> Result<QueryBuilder> {
        self.default_connection().map(|pool| QueryBuilder::new(pool.clone()))
    }

    /// Configured connection names, default first
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
