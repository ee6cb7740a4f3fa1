//! # Route Metadata
//!
//! A registered route and the pieces it is built from: the handler reference
//! and the group attributes that contribute prefixes and middleware.

use crate::error::{Error, Result};
use crate::middleware::Middleware;
use crate::router::Method;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shared middleware handle stored on routes and groups
pub type MiddlewareRef = Arc<dyn Middleware>;

/// Target of a route: a controller name and one of its methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    /// Registered controller name
    pub controller: String,
    /// Method to invoke on the controller
    pub method: String,
}

impl HandlerRef {
    /// Parse a `"Controller@method"` reference
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandlerRef` unless both sides of `@` are non-empty.
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.split_once('@') {
            Some((controller, method)) if !controller.is_empty() && !method.is_empty() => Ok(Self {
                controller: controller.to_string(),
                method: method.to_string(),
            }),
            _ => Err(Error::InvalidHandlerRef {
                reference: reference.to_string(),
            }),
        }
    }
}

impl FromStr for HandlerRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.controller, self.method)
    }
}

/// Attributes of a route group
#[derive(Clone, Default)]
pub struct GroupAttributes {
    /// Path prefix for every route in the group
    pub prefix: String,
    /// Middleware applied before each route's own middleware
    pub middleware: Vec<MiddlewareRef>,
}

impl GroupAttributes {
    /// Empty attributes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path prefix
    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Append a middleware
    #[must_use]
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an already-shared middleware
    #[must_use]
    pub fn middleware_ref(mut self, middleware: MiddlewareRef) -> Self {
        self.middleware.push(middleware);
        self
    }
}

impl fmt::Debug for GroupAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupAttributes")
            .field("prefix", &self.prefix)
            .field("middleware", &middleware_names(&self.middleware))
            .finish()
    }
}

/// A fully resolved route
#[derive(Clone)]
pub struct Route {
    /// HTTP method
    pub method: Method,
    /// Pattern without leading or trailing `/`, group prefixes applied
    pub pattern: String,
    /// Controller and method to invoke
    pub handler: HandlerRef,
    /// Middleware, outermost first
    pub middleware: Vec<MiddlewareRef>,
}

impl Route {
    /// Build a route, trimming `/` from both ends of the pattern
    #[must_use]
    pub fn new(method: Method, pattern: &str, handler: HandlerRef, middleware: Vec<MiddlewareRef>) -> Self {
        Self {
            method,
            pattern: pattern.trim_matches('/').to_string(),
            handler,
            middleware,
        }
    }

    /// Match a request path, returning placeholder values by name
    ///
    /// Segment counts must be equal; literal segments must be identical.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern = segments(&self.pattern);
        let path = segments(path);
        if pattern.len() != path.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, actual) in pattern.iter().zip(&path) {
            match placeholder(expected) {
                Some(name) => {
                    params.insert(name.to_string(), (*actual).to_string());
                }
                None if expected == actual => {}
                None => return None,
            }
        }
        Some(params)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("handler", &self.handler.to_string())
            .field("middleware", &middleware_names(&self.middleware))
            .finish()
    }
}

/// Split a path into segments; the root path has none
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

fn middleware_names(middleware: &[MiddlewareRef]) -> Vec<&'static str> {
    middleware.iter().map(|m| m.name()).collect()
}
