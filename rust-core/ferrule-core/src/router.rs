//! # Router
//!
//! Ordered route table with group support.
//!
//! Routes are matched in registration order and the first match wins, so an
//! earlier `users/{id}` shadows a later `users/active`. Groups contribute a
//! path prefix and middleware to every route registered inside them; nested
//! groups concatenate both, outer to inner.
//!
//! ```ignore
//! let mut router = Router::new();
//! router.get("users", "AppController@index")?;
//! router.group(GroupAttributes::new().prefix("api").middleware(auth), |r| {
//!     r.get("me", "AppController@me")?;
//!     Ok(())
//! })?;
//! ```

use crate::error::{Error, Result};
use crate::route::{GroupAttributes, HandlerRef, MiddlewareRef, Route};
use std::collections::HashMap;
use std::str::FromStr;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(()),
        }
    }
}

impl TryFrom<&hyper::Method> for Method {
    type Error = ();

    fn try_from(method: &hyper::Method) -> std::result::Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

/// A matched route with its extracted path parameters
#[derive(Debug)]
pub struct Match<'a> {
    /// The route that matched
    pub route: &'a Route,
    /// Placeholder values by name
    pub params: HashMap<String, String>,
}

/// Ordered route table
#[derive(Clone, Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
    group_stack: Vec<GroupAttributes>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route inside the active groups
    ///
    /// The stored pattern is the group prefixes and `path` joined with `/`;
    /// the middleware list is every group's middleware, outer to inner,
    /// followed by `middleware`. Duplicates are kept.
    ///
    /// Returns the route's position in the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandlerRef` if `handler` is not `Controller@method`.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: &str,
        middleware: Vec<MiddlewareRef>,
    ) -> Result<usize> {
        let handler = HandlerRef::parse(handler)?;

        let mut pattern = String::new();
        let mut chain = Vec::new();
        for group in &self.group_stack {
            let prefix = group.prefix.trim_matches('/');
            if !prefix.is_empty() {
                pattern.push('/');
                pattern.push_str(prefix);
            }
            chain.extend(group.middleware.iter().cloned());
        }
        pattern.push('/');
        pattern.push_str(path.trim_matches('/'));
        chain.extend(middleware);

        self.routes.push(Route::new(method, &pattern, handler, chain));
        Ok(self.routes.len() - 1)
    }

    /// Register every route added by `routes` under `attributes`
    ///
    /// The group is popped again even if `routes` fails.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `routes`.
    pub fn group<F>(&mut self, attributes: GroupAttributes, routes: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.group_stack.push(attributes);
        let result = routes(self);
        self.group_stack.pop();
        result
    }

    /// Find the first route matching the method and path
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` if no route matches.
    pub fn match_route(&self, method: Method, path: &str) -> Result<Match<'_>> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| route.match_path(path).map(|params| Match { route, params }))
            .ok_or_else(|| Error::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    /// Every route in registration order
    #[must_use]
    pub fn all(&self) -> &[Route] {
        &self.routes
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// Same as [`Router::add_route`].
    pub fn get(&mut self, path: &str, handler: &str) -> Result<usize> {
        self.add_route(Method::Get, path, handler, Vec::new())
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// Same as [`Router::add_route`].
    pub fn post(&mut self, path: &str, handler: &str) -> Result<usize> {
        self.add_route(Method::Post, path, handler, Vec::new())
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// Same as [`Router::add_route`].
    pub fn put(&mut self, path: &str, handler: &str) -> Result<usize> {
        self.add_route(Method::Put, path, handler, Vec::new())
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// Same as [`Router::add_route`].
    pub fn delete(&mut self, path: &str, handler: &str) -> Result<usize> {
        self.add_route(Method::Delete, path, handler, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{BoxFuture, Controller};
    use crate::middleware::{Middleware, Next};
    use crate::request::Request;
    use crate::response::Response;
    use std::sync::Arc;

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle<'a>(
            &'a self,
            req: &'a Request,
            controller: &'a mut dyn Controller,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            next.run(req, controller)
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn names(route: &Route) -> Vec<&'static str> {
        route.middleware.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();

        assert_eq!(router.get("/", "Home@index").unwrap(), 0);
        assert_eq!(router.get("/users", "AppController@index").unwrap(), 1);
        assert_eq!(router.post("/users", "AppController@store").unwrap(), 2);

        let m = router.match_route(Method::Get, "").unwrap();
        assert_eq!(m.route.handler.controller, "Home");

        let m = router.match_route(Method::Get, "users").unwrap();
        assert_eq!(m.route.handler.method, "index");

        let m = router.match_route(Method::Post, "/users").unwrap();
        assert_eq!(m.route.handler.method, "store");
    }

    #[test]
    fn test_path_parameters() {
        let mut router = Router::new();
        router.get("users/{id}", "AppController@show").unwrap();
        router.get("users/{user_id}/posts/{post_id}", "PostController@show").unwrap();

        let m = router.match_route(Method::Get, "users/123").unwrap();
        assert_eq!(m.params.get("id").map(String::as_str), Some("123"));

        let m = router.match_route(Method::Get, "users/456/posts/789").unwrap();
        assert_eq!(m.params.get("user_id").map(String::as_str), Some("456"));
        assert_eq!(m.params.get("post_id").map(String::as_str), Some("789"));
    }

    #[test]
    fn test_first_registered_route_wins() {
        let mut router = Router::new();
        router.get("users/{id}", "AppController@show").unwrap();
        router.get("users/active", "AppController@active").unwrap();

        let m = router.match_route(Method::Get, "users/active").unwrap();
        assert_eq!(m.route.handler.method, "show");
        assert_eq!(m.params.get("id").map(String::as_str), Some("active"));
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut router = Router::new();
        router.get("users", "First@index").unwrap();
        router.get("users", "Second@index").unwrap();

        assert_eq!(router.len(), 2);
        let m = router.match_route(Method::Get, "users").unwrap();
        assert_eq!(m.route.handler.controller, "First");
    }

    #[test]
    fn test_different_literals_never_match() {
        let mut router = Router::new();
        router.get("users/{id}/posts", "A@a").unwrap();
        router.get("{id}/orders/list", "B@b").unwrap();

        assert!(router.match_route(Method::Get, "users/1/comments").is_err());
        assert!(router.match_route(Method::Get, "items/1/posts").is_err());
    }

    #[test]
    fn test_route_not_found() {
        let router = Router::new();
        let err = router.match_route(Method::Get, "nonexistent").unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { .. }));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_method_must_match() {
        let mut router = Router::new();
        router.get("users", "AppController@index").unwrap();

        assert!(router.match_route(Method::Post, "users").is_err());
    }

    #[test]
    fn test_invalid_handler_ref() {
        let mut router = Router::new();
        assert!(matches!(
            router.get("users", "AppController"),
            Err(Error::InvalidHandlerRef { .. })
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn test_nested_group_prefixes_concatenate() {
        let mut router = Router::new();
        router
            .group(GroupAttributes::new().prefix("a"), |r| {
                r.group(GroupAttributes::new().prefix("/b/"), |r| {
                    r.get("c", "X@y")?;
                    Ok(())
                })
            })
            .unwrap();
        router.get("d", "X@z").unwrap();

        assert_eq!(router.all()[0].pattern, "a/b/c");
        assert_eq!(router.all()[1].pattern, "d");
    }

    #[test]
    fn test_group_middleware_order() {
        let mut router = Router::new();
        router
            .group(GroupAttributes::new().middleware(Tag("outer")), |r| {
                r.group(GroupAttributes::new().middleware(Tag("inner")).middleware(Tag("outer")), |r| {
                    r.add_route(Method::Get, "x", "X@y", vec![Arc::new(Tag("own"))])?;
                    Ok(())
                })
            })
            .unwrap();

        assert_eq!(names(&router.all()[0]), vec!["outer", "inner", "outer", "own"]);
    }

    #[test]
    fn test_group_is_popped_on_error() {
        let mut router = Router::new();
        let result = router.group(GroupAttributes::new().prefix("api"), |r| {
            r.get("bad", "nope")?;
            Ok(())
        });
        assert!(result.is_err());

        router.get("ok", "X@y").unwrap();
        assert_eq!(router.all()[0].pattern, "ok");
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>(), Ok(Method::Get));
        assert_eq!(Method::try_from(&hyper::Method::OPTIONS), Ok(Method::Options));
        assert!("TRACE".parse::<Method>().is_err());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }
}
