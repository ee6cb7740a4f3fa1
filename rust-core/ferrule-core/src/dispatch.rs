//! # Request Dispatcher
//!
//! Turns a [`Request`] into a [`Response`]:
//!
//! 1. `OPTIONS` is answered with a bare 200 and CORS headers, before routing
//! 2. the first route matching method and path wins
//! 3. a fresh controller is built and checked for the route's method
//! 4. the route's middleware wraps the controller call, index 0 outermost
//!
//! Every failure is a terminal JSON response: 404 for unmatched routes, 500
//! for a missing controller or method, and the error's own status for
//! anything the controller or middleware returns.

use crate::controller::ControllerRegistry;
use crate::error::{Error, Result};
use crate::middleware::{Cors, Next};
use crate::request::{Input, Request};
use crate::response::Response;
use crate::router::{Method, Router};
use tracing::{debug, error};

/// Routes requests to controllers through their middleware
#[derive(Debug)]
pub struct Dispatcher {
    router: Router,
    controllers: ControllerRegistry,
    cors: Cors,
}

impl Dispatcher {
    /// Dispatch over `router` with controllers from `controllers`
    #[must_use]
    pub fn new(router: Router, controllers: ControllerRegistry) -> Self {
        Self {
            router,
            controllers,
            cors: Cors::default(),
        }
    }

    /// Replace the CORS settings
    #[must_use]
    pub fn with_cors(mut self, cors: Cors) -> Self {
        self.cors = cors;
        self
    }

    /// The route table
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Handle one request
    pub async fn dispatch(&self, req: &Request) -> Response {
        if req.method == Method::Options {
            return self.cors.preflight();
        }

        let mut response = match self.resolve(req).await {
            Ok(response) => response,
            Err(e) => {
                if e.status() >= 500 {
                    error!(method = %req.method, path = %req.path, error = %e, "Dispatch failed");
                }
                e.into_response()
            }
        };
        self.cors.apply(&mut response);
        response
    }

    async fn resolve(&self, req: &Request) -> Result<Response> {
        let path = req.route_path();
        let matched = self.router.match_route(req.method, &path)?;
        let route = matched.route;
        debug!(
            method = %req.method,
            path = %path,
            handler = %route.handler,
            middleware = route.middleware.len(),
            "Route matched"
        );

        let mut controller = self.controllers.create(&route.handler.controller)?;
        if !controller.has_method(&route.handler.method) {
            return Err(Error::MethodNotFound {
                controller: route.handler.controller.clone(),
                method: route.handler.method.clone(),
            });
        }

        let input = req.inputs()?;
        let params = Input::from(matched.params);

        let next = Next::new(&route.middleware, &route.handler.method, input, params);
        Ok(next.run(req, controller.as_mut()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{BoxFuture, Controller};
    use crate::middleware::AuthToken;
    use crate::route::GroupAttributes;
    use crate::validation::{FieldError, ValidationErrors};
    use hyper::body::Bytes;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Users {
        calls: Arc<AtomicUsize>,
        user: Option<Value>,
    }

    impl Controller for Users {
        fn has_method(&self, method: &str) -> bool {
            matches!(method, "index" | "show" | "active" | "store" | "fail" | "invalid")
        }

        fn call<'a>(&'a mut self, method: &'a str, input: Input, params: Input) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match method {
                    "fail" => Err(Error::QueryFailed {
                        message: "no such table: ghosts".to_string(),
                        sql: "SELECT * FROM \"ghosts\"".to_string(),
                    }),
                    "invalid" => {
                        let mut errors = ValidationErrors::new();
                        errors.add(FieldError::required("name"));
                        Err(Error::Validation(errors))
                    }
                    _ => Ok(Response::json(
                        &json!({
                            "method": method,
                            "input": input.all(),
                            "params": params.all(),
                            "user": self.user,
                        }),
                        200,
                    )),
                }
            })
        }

        fn set_user_data(&mut self, data: Value) {
            self.user = Some(data);
        }

        fn user_data(&self) -> Option<&Value> {
            self.user.as_ref()
        }
    }

    fn dispatcher(calls: &Arc<AtomicUsize>, build: impl FnOnce(&mut Router) -> Result<()>) -> Dispatcher {
        let mut router = Router::new();
        build(&mut router).unwrap();

        let mut controllers = ControllerRegistry::new();
        let calls = Arc::clone(calls);
        controllers.register("Users", move || {
            Box::new(Users {
                calls: Arc::clone(&calls),
                user: None,
            })
        });
        Dispatcher::new(router, controllers)
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path, HashMap::new(), None)
    }

    #[tokio::test]
    async fn test_params_are_extracted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users/id/{id}/date/{date}", "Users@show")?;
            Ok(())
        });

        let resp = d.dispatch(&get("/users/id/5/date/2024-01-31")).await;
        assert_eq!(resp.status, 200);
        let body = resp.json_body().unwrap();
        assert_eq!(body["params"], json!({ "date": "2024-01-31", "id": "5" }));
    }

    #[tokio::test]
    async fn test_earlier_route_wins_over_more_specific() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users/{id}", "Users@show")?;
            r.get("users/active", "Users@active")?;
            Ok(())
        });

        let body = d.dispatch(&get("/users/active")).await.json_body().unwrap();
        assert_eq!(body["method"], "show");
        assert_eq!(body["params"]["id"], "active");
    }

    #[tokio::test]
    async fn test_path_query_param_routes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users", "Users@index")?;
            Ok(())
        });

        let body = d.dispatch(&get("/index.php?path=users&page=2")).await.json_body().unwrap();
        assert_eq!(body["method"], "index");
        assert_eq!(body["input"], json!({ "page": "2" }));
    }

    #[tokio::test]
    async fn test_nested_groups() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.group(GroupAttributes::new().prefix("a"), |r| {
                r.group(GroupAttributes::new().prefix("b"), |r| {
                    r.get("items/{id}", "Users@show")?;
                    Ok(())
                })
            })
        });

        let resp = d.dispatch(&get("/a/b/items/9")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(d.dispatch(&get("/b/items/9")).await.status, 404);
    }

    #[tokio::test]
    async fn test_rejecting_middleware_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.group(GroupAttributes::new().prefix("api").middleware(AuthToken::new("s3cret")), |r| {
                r.get("me", "Users@index")?;
                Ok(())
            })
        });

        let resp = d.dispatch(&get("/api/me")).await;
        assert_eq!(resp.status, 401);
        assert_eq!(resp.json_body().unwrap(), json!({ "error": "Token required" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users", "Users@index")?;
            Ok(())
        });

        let resp = d.dispatch(&get("/nothing/here")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.json_body().unwrap(), json!({ "error": "Route not found" }));

        let post = Request::new(Method::Post, "/users", HashMap::new(), None);
        assert_eq!(d.dispatch(&post).await.status, 404);
    }

    #[tokio::test]
    async fn test_missing_controller_and_method() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("ghost", "Ghost@index")?;
            r.get("users", "Users@missing")?;
            Ok(())
        });

        let resp = d.dispatch(&get("/ghost")).await;
        assert_eq!(resp.status, 500);
        assert_eq!(resp.json_body().unwrap(), json!({ "error": "Controller Ghost not found" }));

        let resp = d.dispatch(&get("/users")).await;
        assert_eq!(resp.status, 500);
        assert_eq!(
            resp.json_body().unwrap(),
            json!({ "error": "Method missing not found in Users" })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_errors_become_responses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("fail", "Users@fail")?;
            r.get("invalid", "Users@invalid")?;
            Ok(())
        });

        let resp = d.dispatch(&get("/fail")).await;
        assert_eq!(resp.status, 500);
        let error = resp.json_body().unwrap()["error"].as_str().unwrap().to_string();
        assert!(error.contains("no such table: ghosts"));
        assert!(error.contains("SELECT * FROM"));

        let resp = d.dispatch(&get("/invalid")).await;
        assert_eq!(resp.status, 400);
        assert!(resp.json_body().unwrap()["errors"]["name"].is_string());
    }

    #[tokio::test]
    async fn test_options_preflight_never_reaches_controller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users", "Users@index")?;
            Ok(())
        });

        let req = Request::new(Method::Options, "/anything", HashMap::new(), None);
        let resp = d.dispatch(&req).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());
        assert_eq!(resp.header("access-control-allow-origin"), Some("*"));
        assert_eq!(resp.header("access-control-allow-credentials"), Some("true"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cors_on_controller_responses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.get("users", "Users@index")?;
            Ok(())
        })
        .with_cors(Cors::new().allow_origin("https://app.example.com"));

        let resp = d.dispatch(&get("/users")).await;
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("https://app.example.com"));
    }

    #[tokio::test]
    async fn test_json_body_reaches_controller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(&calls, |r| {
            r.post("users", "Users@store")?;
            Ok(())
        });

        let headers = HashMap::from([("Content-Type".to_string(), "application/json".to_string())]);
        let req = Request::new(
            Method::Post,
            "/users",
            headers.clone(),
            Some(Bytes::from_static(br#"{"name": "<b>Ann</b>"}"#)),
        );
        let body = d.dispatch(&req).await.json_body().unwrap();
        assert_eq!(body["input"], json!({ "name": "Ann" }));

        let bad = Request::new(Method::Post, "/users", headers, Some(Bytes::from_static(b"{")));
        assert_eq!(d.dispatch(&bad).await.status, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
