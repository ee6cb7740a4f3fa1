//! # HTTP Response
//!
//! JSON response value produced by controllers, middleware and the
//! dispatcher, plus the status reason-phrase table.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::Serialize;
use tracing::warn;

/// Reason phrase for the status codes the framework emits
///
/// Codes outside the table render as `"Unknown Status"`.
#[must_use]
pub const fn status_message(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        500 => "Internal Server Error",
        _ => "Unknown Status",
    }
}

/// HTTP response
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers other than `Content-Type`
    pub headers: HeaderMap,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
            headers: HeaderMap::new(),
        }
    }
}

impl Response {
    /// Serialize `data` as the JSON body with the given status
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(data: &T, status: u16) -> Self {
        let body = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
        Self {
            status,
            body,
            ..Self::default()
        }
    }

    /// Empty-bodied response with the given status
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Set a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header, replacing every earlier value
    ///
    /// Names or values that are not valid HTTP are dropped with a warning.
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else if let Some((name, value)) = parse_header(key, value) {
            self.headers.insert(name, value);
        }
    }

    /// Add a header value, keeping earlier values under the same name
    pub fn append_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else if let Some((name, value)) = parse_header(key, value) {
            self.headers.append(name, value);
        }
    }

    /// First header value by name, ignoring case
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Every value of a header, in insertion order
    #[must_use]
    pub fn header_all(&self, key: &str) -> Vec<&str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Parse the body back into JSON
    ///
    /// # Errors
    ///
    /// Returns the parser error when the body is not JSON.
    pub fn json_body(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.body)
    }

    /// Convert to hyper Response
    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .extension(ReasonPhrase::from_static(status_message(self.status).as_bytes()))
            .header("Content-Type", &self.content_type);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = hyper::Response::new(Full::new(Bytes::from("Internal Server Error")));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

fn parse_header(key: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            warn!(header = key, "Dropping invalid response header");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_message_table() {
        assert_eq!(status_message(200), "OK");
        assert_eq!(status_message(201), "Created");
        assert_eq!(status_message(401), "Unauthorized");
        assert_eq!(status_message(406), "Not Acceptable");
        assert_eq!(status_message(500), "Internal Server Error");
        assert_eq!(status_message(418), "Unknown Status");
    }

    #[test]
    fn test_json_response() {
        let resp = Response::json(&json!({ "data": [1, 2] }), 201);
        assert_eq!(resp.status, 201);
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(resp.body, r#"{"data":[1,2]}"#);
    }

    #[test]
    fn test_headers_are_case_insensitive_on_read() {
        let resp = Response::empty(200).with_header("Access-Control-Allow-Origin", "*");
        assert_eq!(resp.header("access-control-allow-origin"), Some("*"));
    }

    #[test]
    fn test_content_type_header_overrides_field() {
        let resp = Response::empty(200).with_header("Content-Type", "text/html");
        assert_eq!(resp.content_type, "text/html");
        assert!(resp.headers.is_empty());
    }

    #[test]
    fn test_set_header_replaces_regardless_of_case() {
        let mut resp = Response::empty(200);
        resp.set_header("Set-Cookie", "a=1");
        resp.set_header("set-cookie", "a=2");
        assert_eq!(resp.header_all("SET-COOKIE"), vec!["a=2"]);

        let hyper_resp = resp.into_hyper();
        assert_eq!(hyper_resp.headers().get_all("set-cookie").iter().count(), 1);
    }

    #[test]
    fn test_append_header_keeps_every_value() {
        let mut resp = Response::empty(200);
        resp.append_header("Set-Cookie", "a=1; Path=/");
        resp.append_header("set-cookie", "b=2; Path=/");
        assert_eq!(resp.header("set-cookie"), Some("a=1; Path=/"));

        let hyper_resp = resp.into_hyper();
        let cookies: Vec<_> = hyper_resp
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1; Path=/", "b=2; Path=/"]);
        assert_eq!(hyper_resp.headers()["content-type"], "application/json");
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let resp = Response::empty(200).with_header("bad header", "x");
        assert!(resp.headers.is_empty());
    }

    #[test]
    fn test_into_hyper_keeps_status() {
        let resp = Response::json(&json!({ "error": "Route not found" }), 404).into_hyper();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
