//! # HTTP Server
//!
//! HTTP/1 server built on Hyper and Tokio, in front of a [`Dispatcher`].
//!
//! ## Key Features
//!
//! - One task per connection, keep-alive handled by hyper
//! - Graceful shutdown on Ctrl-C with a bounded drain of in-flight connections
//! - Request body size limit (413)
//! - One access-log line per request

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const REQUEST_ID: &str = "x-request-id";

/// HTTP server
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Serve `dispatcher` with `config`
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// `Error::BindError` if the address cannot be bound, `Error::Io` if
    /// accepting connections fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let listener = bind(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;

        info!("Server listening on http://{}", addr);

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move {
                                Ok::<_, hyper::Error>(
                                    handle_request(req, &dispatcher, remote_addr, max_body_size).await,
                                )
                            }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = shutdown_signal() => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            info!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with connections still open"
            );
        }
        Ok(())
    }

    /// Handle a request without the network stack
    pub async fn handle(&self, req: Request) -> Response {
        if let Some(len) = req.body_bytes().map(<[u8]>::len) {
            if len > self.config.max_body_size {
                return Error::PayloadTooLarge {
                    limit: self.config.max_body_size,
                    actual: len,
                }
                .into_response();
            }
        }
        process_request(req, &self.dispatcher).await
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler; shutdown only by termination");
        std::future::pending::<()>().await;
    }
}

/// Core request processing logic (network agnostic)
async fn process_request(mut req: Request, dispatcher: &Dispatcher) -> Response {
    let request_id = match req.header(REQUEST_ID) {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            req.set_header(REQUEST_ID, &id);
            id
        }
    };

    let mut response = dispatcher.dispatch(&req).await;
    response.set_header(REQUEST_ID, &request_id);
    response
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    dispatcher: &Dispatcher,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = req.version();

    let response = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(request) => process_request(request, dispatcher).await,
        Err(e) => {
            if !matches!(
                e,
                Error::PayloadTooLarge { .. } | Error::UnsupportedMethod { .. } | Error::BodyRead { .. }
            ) {
                error!("Failed to parse request: {}", e);
            }
            e.into_response()
        }
    };

    info!(
        remote = %remote_addr,
        method = %method,
        path = %path,
        version = ?version,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis(),
        "Request handled"
    );
    response.into_hyper()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{BoxFuture, Controller, ControllerRegistry};
    use crate::request::Input;
    use crate::router::{Method, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct Ping;

    impl Controller for Ping {
        fn has_method(&self, method: &str) -> bool {
            method == "ping"
        }

        fn call<'a>(&'a mut self, _method: &'a str, _input: Input, _params: Input) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async { Ok(Response::json(&json!({ "pong": true }), 200)) })
        }

        fn set_user_data(&mut self, _data: Value) {}

        fn user_data(&self) -> Option<&Value> {
            None
        }
    }

    fn server(max_body_size: usize) -> Server {
        let mut router = Router::new();
        router.get("ping", "Ping@ping").unwrap();
        router.post("ping", "Ping@ping").unwrap();
        let mut controllers = ControllerRegistry::new();
        controllers.register("Ping", || Box::new(Ping));

        let config = ServerConfig {
            max_body_size,
            ..ServerConfig::default()
        };
        Server::new(config, Dispatcher::new(router, controllers))
    }

    #[tokio::test]
    async fn test_handle_dispatches() {
        let resp = server(1024)
            .handle(Request::new(Method::Get, "/ping", HashMap::new(), None))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.json_body().unwrap(), json!({ "pong": true }));
        assert!(resp.header(REQUEST_ID).is_some());
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let headers = HashMap::from([(REQUEST_ID.to_string(), "abc-123".to_string())]);
        let resp = server(1024)
            .handle(Request::new(Method::Get, "/ping", headers, None))
            .await;
        assert_eq!(resp.header(REQUEST_ID), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let body = Some(Bytes::from(vec![b'x'; 64]));
        let resp = server(16)
            .handle(Request::new(Method::Post, "/ping", HashMap::new(), body))
            .await;
        assert_eq!(resp.status, 413);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }
}
