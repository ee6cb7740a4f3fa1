//! # Ferrule Core
//!
//! Core library for the Ferrule micro-framework: an ordered router with route
//! groups, a dispatcher that wraps controllers in middleware, token and
//! session authentication, and a fluent query builder over named database
//! connections.
//!
//! ## Modules
//!
//! - `server` - HTTP server built on Hyper
//! - `dispatch` - Route matching, controller lookup and middleware chain
//! - `router` - Ordered route table with groups
//! - `route` - Route metadata and handler references
//! - `controller` - Controller trait and registry
//! - `middleware` - Token, session and CORS middleware
//! - `request` / `response` - HTTP request input parsing and JSON responses
//! - `query` - Fluent SQL builder with staged writes
//! - `database` - SQLx connections (SQLite, PostgreSQL) and the named registry
//! - `session` - Session cookie settings and stores
//! - `validation` - Rule-based input validation
//! - `json` - JSON body parsing with simd-json
//! - `config` - Environment configuration
//! - `logging` - Tracing subscriber setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod json;
pub mod logging;
pub mod middleware;
pub mod query;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod session;
pub mod validation;

pub use config::{AuthConfig, Config, ConnectionConfig, DatabaseConfig, ServerConfig};
pub use controller::{BoxFuture, Controller, ControllerRegistry};
pub use database::{ConnectionRegistry, DatabasePool, DbValue, Record};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use middleware::{AuthSession, AuthToken, Cors, Middleware, Next};
pub use query::{Direction, JoinKind, QueryBuilder};
pub use request::{Input, Request};
pub use response::{status_message, Response};
pub use route::{GroupAttributes, HandlerRef, MiddlewareRef, Route};
pub use router::{Method, Router};
pub use server::Server;
pub use session::{MemorySessionStore, SameSite, SessionConfig, SessionStore};
pub use validation::{FieldError, ValidationCode, ValidationErrors, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
