//! # Middleware System
//!
//! Wrappers around controller invocation.
//!
//! A route's middleware runs outermost first. Each layer receives the
//! controller instance and a [`Next`] continuation; it either calls
//! [`Next::run`] to continue inward or returns its own response, in which case
//! nothing further down the chain (including the controller) executes.

use crate::config::AuthConfig;
use crate::controller::{BoxFuture, Controller};
use crate::error::Error;
use crate::request::{Input, Request};
use crate::response::Response;
use crate::route::MiddlewareRef;
use crate::session::{SessionConfig, SessionStore};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

static BEARER: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bearer\s(\S+)").expect("bearer pattern is valid"));

/// A layer around controller invocation
pub trait Middleware: Send + Sync {
    /// Handle the request, calling `next.run(req, controller)` to continue
    fn handle<'a>(
        &'a self,
        req: &'a Request,
        controller: &'a mut dyn Controller,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// The rest of the chain: remaining middleware, then the controller method
pub struct Next<'a> {
    middleware: &'a [MiddlewareRef],
    method: &'a str,
    input: Input,
    params: Input,
}

impl<'a> Next<'a> {
    /// Chain that runs `middleware` in order and then `controller.call(method, input, params)`
    #[must_use]
    pub const fn new(middleware: &'a [MiddlewareRef], method: &'a str, input: Input, params: Input) -> Self {
        Self {
            middleware,
            method,
            input,
            params,
        }
    }

    /// Continue with the next layer
    ///
    /// Controller errors become JSON error responses here.
    pub fn run(self, req: &'a Request, controller: &'a mut dyn Controller) -> BoxFuture<'a, Response> {
        match self.middleware.split_first() {
            Some((layer, rest)) => {
                debug!(middleware = layer.name(), "Entering middleware");
                layer.handle(req, controller, Next { middleware: rest, ..self })
            }
            None => Box::pin(async move {
                match controller.call(self.method, self.input, self.params).await {
                    Ok(response) => response,
                    Err(e) => {
                        if e.status() >= 500 {
                            error!(method = self.method, error = %e, "Handler failed");
                        }
                        e.into_response()
                    }
                }
            }),
        }
    }
}

fn unauthorized(reason: impl Into<String>) -> Response {
    Error::Unauthorized { reason: reason.into() }.into_response()
}

/// Bearer-token authentication (HS256)
///
/// The token is read from `X-Auth-Token`, or from `Authorization: Bearer <token>`.
/// Verified claims are attached to the controller as user data.
#[derive(Clone)]
pub struct AuthToken {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthToken {
    /// Verify tokens signed with `secret`
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify tokens with the configured secret
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret)
    }

    fn token(req: &Request) -> Option<&str> {
        if let Some(token) = req.header("x-auth-token").filter(|t| !t.is_empty()) {
            return Some(token);
        }
        let header = req.header("authorization")?;
        BEARER.captures(header).and_then(|c| c.get(1)).map(|m| m.as_str())
    }
}

impl Middleware for AuthToken {
    fn handle<'a>(
        &'a self,
        req: &'a Request,
        controller: &'a mut dyn Controller,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let Some(token) = Self::token(req) else {
                return unauthorized("Token required");
            };

            match decode::<Value>(token, &self.decoding_key, &self.validation) {
                Ok(data) => {
                    controller.set_user_data(data.claims);
                    next.run(req, controller).await
                }
                Err(e) => {
                    warn!(path = %req.path, error = %e, "Token verification failed");
                    unauthorized(format!("Invalid token: {e}"))
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "AuthToken"
    }
}

/// Session authentication
///
/// Resumes the session named by the cookie and requires `key` to be set in
/// it. The stored value is attached to the controller as user data. Requests
/// without a live session are rejected without touching the store; sessions
/// are opened by whatever handles login.
#[derive(Clone)]
pub struct AuthSession {
    key: String,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl AuthSession {
    /// Require `key` in sessions kept by `store`
    pub fn new(key: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            key: key.into(),
            store,
            config: SessionConfig::default(),
        }
    }

    /// Use custom cookie settings
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

impl Middleware for AuthSession {
    fn handle<'a>(
        &'a self,
        req: &'a Request,
        controller: &'a mut dyn Controller,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let value = self
                .config
                .session_id(req.header("cookie"))
                .and_then(|id| self.store.get(id, &self.key));

            match value {
                Some(value) => {
                    controller.set_user_data(value);
                    next.run(req, controller).await
                }
                None => {
                    debug!(path = %req.path, "No authenticated session");
                    Response::json(
                        &json!({ "status": 401, "error": "Unauthorized - please login" }),
                        401,
                    )
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "AuthSession"
    }
}

/// Cross-Origin Resource Sharing headers
#[derive(Debug, Clone)]
pub struct Cors {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
    allow_credentials: bool,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, PUT, POST, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, X-Auth-Token, Origin, Authorization".to_string(),
            allow_credentials: true,
        }
    }
}

impl Cors {
    /// Create CORS settings with the defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Toggle `Access-Control-Allow-Credentials`
    #[must_use]
    pub const fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }

    /// Add the CORS headers to a response
    pub fn apply(&self, res: &mut Response) {
        res.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        res.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        res.set_header("Access-Control-Allow-Headers", &self.allow_headers);
        if self.allow_credentials {
            res.set_header("Access-Control-Allow-Credentials", "true");
        }
    }

    /// Bare 200 preflight answer
    #[must_use]
    pub fn preflight(&self) -> Response {
        let mut res = Response::empty(200);
        self.apply(&mut res);
        res
    }
}

impl Middleware for Cors {
    fn handle<'a>(
        &'a self,
        req: &'a Request,
        controller: &'a mut dyn Controller,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut res = next.run(req, controller).await;
            self.apply(&mut res);
            res
        })
    }

    fn name(&self) -> &'static str {
        "Cors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::router::Method;
    use crate::session::MemorySessionStore;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SECRET: &str = "test-secret";

    struct Counting {
        calls: Arc<AtomicUsize>,
        user: Option<Value>,
    }

    impl Counting {
        fn new(calls: &Arc<AtomicUsize>) -> Self {
            Self {
                calls: Arc::clone(calls),
                user: None,
            }
        }
    }

    impl Controller for Counting {
        fn has_method(&self, method: &str) -> bool {
            method == "index"
        }

        fn call<'a>(&'a mut self, _method: &'a str, _input: Input, _params: Input) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Response::json(&json!({ "user": self.user }), 200))
            })
        }

        fn set_user_data(&mut self, data: Value) {
            self.user = Some(data);
        }

        fn user_data(&self) -> Option<&Value> {
            self.user.as_ref()
        }
    }

    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Trace {
        fn handle<'a>(
            &'a self,
            req: &'a Request,
            controller: &'a mut dyn Controller,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.label);
                next.run(req, controller).await
            })
        }
    }

    fn request(headers: &[(&str, &str)]) -> Request {
        let headers: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Request::new(Method::Get, "/secure", headers, None)
    }

    fn token(claims: &Value, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    async fn run(chain: &[MiddlewareRef], req: &Request, controller: &mut dyn Controller) -> Response {
        Next::new(chain, "index", Input::default(), Input::default())
            .run(req, controller)
            .await
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];

        let resp = run(&chain, &request(&[]), &mut controller).await;

        assert_eq!(resp.status, 401);
        assert_eq!(resp.json_body().unwrap(), json!({ "error": "Token required" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_header_token_attaches_claims() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];
        let jwt = token(&json!({ "sub": "42", "role": "admin" }), SECRET);

        let resp = run(&chain, &request(&[("X-Auth-Token", jwt.as_str())]), &mut controller).await;

        assert_eq!(resp.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.user_data(), Some(&json!({ "sub": "42", "role": "admin" })));
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];
        let bearer = format!("Bearer {}", token(&json!({ "sub": "7" }), SECRET));

        let resp = run(&chain, &request(&[("Authorization", bearer.as_str())]), &mut controller).await;

        assert_eq!(resp.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_bearer_authorization_is_missing_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];

        let resp = run(&chain, &request(&[("Authorization", "Basic abc")]), &mut controller).await;

        assert_eq!(resp.json_body().unwrap(), json!({ "error": "Token required" }));
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];
        let forged = token(&json!({ "sub": "42" }), "other-secret");

        let resp = run(&chain, &request(&[("X-Auth-Token", forged.as_str())]), &mut controller).await;

        assert_eq!(resp.status, 401);
        let body = resp.json_body().unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Invalid token: "));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthToken::new(SECRET))];
        let expired = token(&json!({ "sub": "42", "exp": 1_000_000 }), SECRET);

        let resp = run(&chain, &request(&[("X-Auth-Token", expired.as_str())]), &mut controller).await;

        assert_eq!(resp.status, 401);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_without_key_is_unauthorized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let store = Arc::new(MemorySessionStore::new());
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthSession::new("user", store.clone()))];

        let resp = run(&chain, &request(&[]), &mut controller).await;

        assert_eq!(resp.status, 401);
        assert_eq!(
            resp.json_body().unwrap(),
            json!({ "status": 401, "error": "Unauthorized - please login" })
        );
        assert!(resp.header("set-cookie").is_none());
        assert!(store.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_sessions_leave_store_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemorySessionStore::new());
        let anonymous = store.create();
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthSession::new("user", store.clone()))];

        let unknown = request(&[("Cookie", "FERRULE_SESSION=does-not-exist")]);
        let keyless_cookie = format!("FERRULE_SESSION={anonymous}");
        let keyless = request(&[("Cookie", keyless_cookie.as_str())]);
        for _ in 0..100 {
            for req in [&request(&[]), &unknown, &keyless] {
                let mut controller = Counting::new(&calls);
                assert_eq!(run(&chain, req, &mut controller).await.status, 401);
            }
        }

        assert_eq!(store.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_with_key_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let store = Arc::new(MemorySessionStore::new());
        let id = store.create();
        store.put(&id, "user", json!({ "id": 1, "name": "Ann" }));
        let chain: Vec<MiddlewareRef> = vec![Arc::new(AuthSession::new("user", store))];

        let cookie = format!("FERRULE_SESSION={id}");
        let resp = run(&chain, &request(&[("Cookie", cookie.as_str())]), &mut controller).await;

        assert_eq!(resp.status, 200);
        assert!(resp.header("set-cookie").is_none());
        assert_eq!(controller.user_data(), Some(&json!({ "id": 1, "name": "Ann" })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_zero_is_outermost() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<MiddlewareRef> = vec![
            Arc::new(Trace { label: "first", log: log.clone() }),
            Arc::new(Trace { label: "second", log: log.clone() }),
            Arc::new(AuthToken::new(SECRET)),
            Arc::new(Trace { label: "never", log: log.clone() }),
        ];

        let resp = run(&chain, &request(&[]), &mut controller).await;

        assert_eq!(resp.status, 401);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cors_middleware_adds_headers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut controller = Counting::new(&calls);
        let chain: Vec<MiddlewareRef> = vec![Arc::new(Cors::new().allow_origin("https://example.com"))];

        let resp = run(&chain, &request(&[]), &mut controller).await;

        assert_eq!(resp.header("access-control-allow-origin"), Some("https://example.com"));
        assert_eq!(resp.header("access-control-allow-credentials"), Some("true"));
    }

    #[test]
    fn test_cors_preflight_defaults() {
        let resp = Cors::new().preflight();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            resp.header("Access-Control-Allow-Methods"),
            Some("GET, PUT, POST, DELETE, OPTIONS")
        );
        assert_eq!(
            resp.header("Access-Control-Allow-Headers"),
            Some("Content-Type, X-Auth-Token, Origin, Authorization")
        );
    }

    #[test]
    fn test_middleware_names() {
        assert_eq!(AuthToken::new(SECRET).name(), "AuthToken");
        assert_eq!(Cors::new().name(), "Cors");
    }
}
