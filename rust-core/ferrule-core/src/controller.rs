//! # Controllers
//!
//! Route targets. A fresh controller instance is created for every dispatched
//! request from the factory registered under its name.

use crate::error::{Error, Result};
use crate::request::Input;
use crate::response::Response;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by controllers and middleware
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request handler addressed by `Controller@method`
///
/// `call` receives the parsed request input and the path parameters, both as
/// [`Input`]. Middleware may attach authenticated user data before `call`
/// runs.
pub trait Controller: Send {
    /// Whether `method` can be invoked through [`Controller::call`]
    fn has_method(&self, method: &str) -> bool;

    /// Invoke `method`
    ///
    /// Errors are turned into JSON error responses by the dispatcher.
    fn call<'a>(&'a mut self, method: &'a str, input: Input, params: Input) -> BoxFuture<'a, Result<Response>>;

    /// Attach data established by middleware (token claims, session value)
    fn set_user_data(&mut self, data: Value);

    /// Data attached by middleware, if any
    fn user_data(&self) -> Option<&Value>;
}

type Factory = Arc<dyn Fn() -> Box<dyn Controller> + Send + Sync>;

/// Controller factories by name
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: HashMap<String, Factory>,
}

impl ControllerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Whether a controller is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a new controller instance
    ///
    /// # Errors
    ///
    /// Returns `Error::ControllerNotFound` for unknown names.
    pub fn create(&self, name: &str) -> Result<Box<dyn Controller>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::ControllerNotFound {
                controller: name.to_string(),
            })
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ControllerRegistry").field("controllers", &names).finish()
    }
}
