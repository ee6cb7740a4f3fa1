//! # Error Handling
//!
//! Centralized error types for Ferrule core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Every variant knows the HTTP status it surfaces as, so the dispatcher and
//! middleware can turn any failure into a terminal JSON response.

use crate::response::Response;
use crate::validation::ValidationErrors;
use serde_json::json;
use thiserror::Error;

/// Result type alias for Ferrule operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Ferrule runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// No registered route matched the method and path
    #[error("Route not found")]
    RouteNotFound {
        /// Request method
        method: String,
        /// The path that wasn't matched
        path: String,
    },

    /// Request used a method the router does not handle
    #[error("Method {method} not allowed")]
    UnsupportedMethod {
        /// Method as sent by the client
        method: String,
    },

    /// The matched route names a controller nobody registered
    #[error("Controller {controller} not found")]
    ControllerNotFound {
        /// Controller name from the route
        controller: String,
    },

    /// The controller exists but has no such method
    #[error("Method {method} not found in {controller}")]
    MethodNotFound {
        /// Controller name from the route
        controller: String,
        /// Method name from the route
        method: String,
    },

    /// Handler reference is not of the form `Controller@method`
    #[error("Invalid handler reference: {reference}")]
    InvalidHandlerRef {
        /// The offending reference
        reference: String,
    },

    /// Authentication failed
    #[error("{reason}")]
    Unauthorized {
        /// Message returned to the client
        reason: String,
    },

    /// Request data failed validation
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(ValidationErrors),

    /// The database rejected a statement
    #[error("Query failed: {message}\nQuery: {sql}")]
    QueryFailed {
        /// Engine error text
        message: String,
        /// The SQL that failed
        sql: String,
    },

    /// Query builder was used in a way that cannot produce a statement
    #[error("Invalid query: {reason}")]
    InvalidQuery {
        /// What was wrong
        reason: String,
    },

    /// A second write was staged while another one is still pending
    #[error("Cannot stage {requested} while {staged} is pending")]
    ConflictingOperation {
        /// Operation already staged
        staged: &'static str,
        /// Operation the caller tried to stage
        requested: &'static str,
    },

    /// No open connection under this name
    #[error("No connection available for {name}")]
    ConnectionNotFound {
        /// Requested connection name
        name: String,
    },

    /// Database driver error outside of statement execution
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Request body claimed to be JSON but did not parse
    #[error("Invalid JSON: {reason}")]
    InvalidJson {
        /// Parser message
        reason: String,
    },

    /// Request body could not be read to the end
    #[error("Failed to read request body: {reason}")]
    BodyRead {
        /// Transport message
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// HTTP status this error surfaces as
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } => 404,
            Self::Unauthorized { .. } => 401,
            Self::Validation(_) | Self::InvalidJson { .. } | Self::BodyRead { .. } => 400,
            Self::UnsupportedMethod { .. } => 405,
            Self::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }

    /// Render the error as a terminal JSON response
    #[must_use]
    pub fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Validation(errors) => Response::json(&json!({ "errors": errors.by_field() }), status),
            other => Response::json(&json!({ "error": other.to_string() }), status),
        }
    }
}
