//! # Ferrule
//!
//! Demo server: users CRUD over the query builder, token-protected lookups and
//! a token-to-session login.
//!
//! Configuration comes from the environment (and `.env`): `APP_HOST`,
//! `APP_PORT`, `DB_CONNECTIONS`, `DB_URL`, `JWT_SECRET`, `AUTH_SESSION_*`,
//! `LOG_LEVEL`, `LOG_FORMAT`.

mod controllers;
mod routes;
mod schema;

use anyhow::Context;
use ferrule_core::logging::{self, LogFormat};
use ferrule_core::{Config, ConnectionRegistry, MemorySessionStore, Server, SessionStore};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(&config.log_level, LogFormat::from_env());
    info!(version = ferrule_core::VERSION, "Starting ferrule");

    let registry = ConnectionRegistry::connect(&config.database).await;
    match registry.default_connection() {
        Ok(pool) => schema::ensure_tables(pool).await.context("creating tables")?,
        Err(e) => warn!(error = %e, "No default database, user routes will fail"),
    }
    let registry = Arc::new(registry);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::from_config(&config.session));

    let dispatcher = routes::dispatcher(&config, &registry, &sessions).context("building routes")?;
    info!(routes = dispatcher.router().len(), "Routes registered");

    Server::new(config.server.clone(), dispatcher).serve().await?;

    for name in registry.names() {
        if let Ok(pool) = registry.get(name) {
            pool.close().await;
        }
    }
    info!("Server stopped");
    Ok(())
}
