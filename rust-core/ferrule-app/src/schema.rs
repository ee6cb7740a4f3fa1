//! Tables the demo controllers need, created on startup if missing.

use ferrule_core::{DatabasePool, Result};
use tracing::debug;

fn id_column(pool: &DatabasePool) -> &'static str {
    match pool {
        DatabasePool::Sqlite(_) => "INTEGER PRIMARY KEY AUTOINCREMENT",
        DatabasePool::Postgres(_) => "BIGSERIAL PRIMARY KEY",
    }
}

/// Create `usersimple` if it does not exist
///
/// # Errors
///
/// Returns `Error::QueryFailed` if the DDL is rejected.
pub async fn ensure_tables(pool: &DatabasePool) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS usersimple (\
         id {}, \
         name TEXT NOT NULL, \
         username TEXT NOT NULL, \
         deleted INTEGER NOT NULL DEFAULT 0, \
         created_at TEXT, \
         updated_at TEXT)",
        id_column(pool)
    );
    pool.execute(&sql).await?;
    debug!("Schema ready");
    Ok(())
}
