//! # Query Builder
//!
//! Fluent SQL builder bound to one database connection.
//!
//! The builder stages exactly one operation at a time:
//!
//! - a read (`select` + clauses), resolved by [`QueryBuilder::get`] or
//!   [`QueryBuilder::first`]
//! - an update or a delete, resolved by [`QueryBuilder::execute`]
//!
//! [`QueryBuilder::where_eq`] only ever sets criteria on whatever is staged;
//! it never runs anything. Writes reset the builder once they run. Reads leave
//! their clauses in place until [`QueryBuilder::reset`].
//!
//! Values are escaped and inlined into the SQL text.
//!
//! ```ignore
//! let users = db.query("marsdb")?
//!     .select(["id", "name"], "users")
//!     .where_eq([("deleted", 0)])
//!     .order_by("id", Direction::Desc)
//!     .limit(10)
//!     .get()
//!     .await?;
//!
//! let changed = qb.update("users", [("name", "Ann")])?
//!     .where_eq([("id", 1)])
//!     .execute()
//!     .await?;
//! ```

use crate::database::{DatabasePool, DbValue, Record};
use crate::error::{Error, Result};

/// Kind of JOIN clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `CROSS JOIN`
    Cross,
    /// Bare `JOIN`
    Plain,
}

impl JoinKind {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Cross => "CROSS JOIN",
            Self::Plain => "JOIN",
        }
    }
}

/// Sort direction for `ORDER BY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl Direction {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Column list accepted by [`QueryBuilder::select`] and [`QueryBuilder::group_by`]
pub trait IntoColumns {
    /// Render as a comma-separated column list
    fn into_columns(self) -> String;
}

impl IntoColumns for &str {
    fn into_columns(self) -> String {
        self.to_string()
    }
}

impl IntoColumns for String {
    fn into_columns(self) -> String {
        self
    }
}

impl IntoColumns for &[&str] {
    fn into_columns(self) -> String {
        self.join(", ")
    }
}

impl<const N: usize> IntoColumns for [&str; N] {
    fn into_columns(self) -> String {
        self.join(", ")
    }
}

impl IntoColumns for Vec<&str> {
    fn into_columns(self) -> String {
        self.join(", ")
    }
}

impl IntoColumns for Vec<String> {
    fn into_columns(self) -> String {
        self.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PendingOperation {
    Select,
    Update { table: String, data: Vec<(String, DbValue)> },
    Delete { table: String },
}

impl PendingOperation {
    const fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    on: String,
}

/// Stateful SQL builder bound to one connection
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    conn: DatabasePool,
    operation: PendingOperation,
    columns: String,
    table: String,
    joins: Vec<Join>,
    criteria: Vec<(String, DbValue)>,
    group_by: String,
    order_by: Option<(String, Direction)>,
    limit: Option<(u64, Option<u64>)>,
}

fn pairs<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Vec<(String, DbValue)>
where
    K: Into<String>,
    V: Into<DbValue>,
{
    data.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

impl QueryBuilder {
    /// Create an empty builder on `conn`
    #[must_use]
    pub fn new(conn: DatabasePool) -> Self {
        Self {
            conn,
            operation: PendingOperation::Select,
            columns: "*".to_string(),
            table: String::new(),
            joins: Vec::new(),
            criteria: Vec::new(),
            group_by: String::new(),
            order_by: None,
            limit: None,
        }
    }

    /// The connection this builder runs against
    #[must_use]
    pub const fn connection(&self) -> &DatabasePool {
        &self.conn
    }

    /// Set the projection and, when `table` is non-empty, the source table
    pub fn select(&mut self, columns: impl IntoColumns, table: &str) -> &mut Self {
        self.columns = columns.into_columns();
        if !table.is_empty() {
            self.table = table.to_string();
        }
        self
    }

    /// Append a join clause; an empty `on` omits the `ON` part
    pub fn join(&mut self, kind: JoinKind, table: &str, on: &str) -> &mut Self {
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            on: on.to_string(),
        });
        self
    }

    /// Replace the criteria with equality predicates, joined by `AND`
    ///
    /// Applies to whichever operation is staged. Nothing is executed.
    pub fn where_eq<K, V>(&mut self, predicates: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<DbValue>,
    {
        self.criteria = pairs(predicates);
        self
    }

    /// Sort by one column
    pub fn order_by(&mut self, column: &str, direction: Direction) -> &mut Self {
        self.order_by = Some((column.to_string(), direction));
        self
    }

    /// Group by a column list
    pub fn group_by(&mut self, columns: impl IntoColumns) -> &mut Self {
        self.group_by = columns.into_columns();
        self
    }

    /// Return at most `n` rows
    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = Some((n, None));
        self
    }

    /// Return at most `n` rows after skipping `offset`
    pub fn limit_offset(&mut self, n: u64, offset: u64) -> &mut Self {
        self.limit = Some((n, Some(offset)));
        self
    }

    /// Stage an update of `table` with `data`
    ///
    /// # Errors
    ///
    /// `Error::InvalidQuery` if the table or data is empty,
    /// `Error::ConflictingOperation` if another write is already staged.
    pub fn update<K, V>(&mut self, table: &str, data: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: Into<String>,
        V: Into<DbValue>,
    {
        let data = pairs(data);
        if table.is_empty() || data.is_empty() {
            return Err(Error::InvalidQuery {
                reason: "Table and data are required for update".to_string(),
            });
        }
        self.stage(PendingOperation::Update {
            table: table.to_string(),
            data,
        })
    }

    /// Stage a delete from `table`
    ///
    /// # Errors
    ///
    /// `Error::InvalidQuery` if the table is empty,
    /// `Error::ConflictingOperation` if another write is already staged.
    pub fn delete(&mut self, table: &str) -> Result<&mut Self> {
        if table.is_empty() {
            return Err(Error::InvalidQuery {
                reason: "Table name is required for delete".to_string(),
            });
        }
        self.stage(PendingOperation::Delete {
            table: table.to_string(),
        })
    }

    fn stage(&mut self, operation: PendingOperation) -> Result<&mut Self> {
        if self.operation != PendingOperation::Select {
            return Err(Error::ConflictingOperation {
                staged: self.operation.name(),
                requested: operation.name(),
            });
        }
        self.operation = operation;
        self.criteria.clear();
        Ok(self)
    }

    /// Run the staged read and return every row
    ///
    /// # Errors
    ///
    /// `Error::InvalidQuery` if a write is staged or no table was selected,
    /// `Error::QueryFailed` if the database rejects the statement.
    pub async fn get(&mut self) -> Result<Vec<Record>> {
        let sql = self.select_sql()?;
        self.conn.fetch_all(&sql).await
    }

    /// Run the staged read with `LIMIT 1` and return the first row
    ///
    /// # Errors
    ///
    /// Same as [`QueryBuilder::get`].
    pub async fn first(&mut self) -> Result<Option<Record>> {
        self.limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    /// Run the staged update or delete and return the affected row count
    ///
    /// The builder is reset afterwards, whether or not the statement succeeded.
    ///
    /// # Errors
    ///
    /// `Error::InvalidQuery` if no write is staged or no criteria were given
    /// (the staged write is kept in that case), `Error::QueryFailed` if the
    /// database rejects the statement.
    pub async fn execute(&mut self) -> Result<u64> {
        let sql = self.write_sql()?;
        self.reset();
        self.conn.execute(&sql).await
    }

    /// Insert one row immediately and return its id
    ///
    /// Does not touch the staged operation.
    ///
    /// # Errors
    ///
    /// `Error::InvalidQuery` if the table or data is empty,
    /// `Error::QueryFailed` if the database rejects the statement.
    pub async fn insert<K, V>(&self, table: &str, data: impl IntoIterator<Item = (K, V)>) -> Result<i64>
    where
        K: Into<String>,
        V: Into<DbValue>,
    {
        let data = pairs(data);
        if table.is_empty() || data.is_empty() {
            return Err(Error::InvalidQuery {
                reason: "Table and data are required for insert".to_string(),
            });
        }
        let columns: Vec<String> = data.iter().map(|(c, _)| self.conn.quote_ident(c)).collect();
        let values: Vec<String> = data.iter().map(|(_, v)| self.conn.literal(v)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.conn.quote_table(table),
            columns.join(", "),
            values.join(", ")
        );
        self.conn.insert(&sql).await
    }

    /// Clear every clause and any staged write
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new(self.conn.clone());
        self
    }

    /// The SQL the staged operation would run
    ///
    /// # Errors
    ///
    /// Same validation as the terminal that would run it.
    pub fn to_sql(&self) -> Result<String> {
        match self.operation {
            PendingOperation::Select => self.select_sql(),
            _ => self.write_sql(),
        }
    }

    fn select_sql(&self) -> Result<String> {
        if self.operation != PendingOperation::Select {
            return Err(Error::InvalidQuery {
                reason: format!("{} is staged; call execute()", self.operation.name()),
            });
        }
        if self.table.is_empty() {
            return Err(Error::InvalidQuery {
                reason: "No table selected".to_string(),
            });
        }

        let mut sql = format!("SELECT {} FROM {}", self.columns, self.conn.quote_table(&self.table));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&self.conn.quote_table(&join.table));
            if !join.on.is_empty() {
                sql.push_str(" ON ");
                sql.push_str(&join.on);
            }
        }

        if !self.criteria.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clause());
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by);
        }

        if let Some((column, direction)) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {} {}", self.conn.quote_ident(column), direction.keyword()));
        }

        match self.limit {
            Some((n, Some(offset))) => sql.push_str(&format!(" LIMIT {n} OFFSET {offset}")),
            Some((n, None)) => sql.push_str(&format!(" LIMIT {n}")),
            None => {}
        }

        Ok(sql)
    }

    fn write_sql(&self) -> Result<String> {
        let verb = self.operation.name();
        if matches!(self.operation, PendingOperation::Select) {
            return Err(Error::InvalidQuery {
                reason: "Nothing staged to execute; use update() or delete()".to_string(),
            });
        }
        if self.criteria.is_empty() {
            return Err(Error::InvalidQuery {
                reason: format!("Refusing to {verb} without criteria"),
            });
        }

        let where_clause = self.where_clause();
        Ok(match &self.operation {
            PendingOperation::Update { table, data } => {
                let set: Vec<String> = data
                    .iter()
                    .map(|(column, value)| format!("{} = {}", self.conn.quote_ident(column), self.conn.literal(value)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {where_clause}",
                    self.conn.quote_table(table),
                    set.join(", ")
                )
            }
            PendingOperation::Delete { table } => {
                format!("DELETE FROM {} WHERE {where_clause}", self.conn.quote_table(table))
            }
            PendingOperation::Select => unreachable!("select rejected above"),
        })
    }

    fn where_clause(&self) -> String {
        self.criteria
            .iter()
            .map(|(column, value)| {
                let column = self.conn.quote_ident(column);
                if *value == DbValue::Null {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} = {}", self.conn.literal(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
