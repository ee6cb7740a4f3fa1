//! # HTTP Request
//!
//! Request wrapper with the body collected up front, plus the [`Input`] map
//! handed to controllers.
//!
//! Input parsing follows the method:
//!
//! - `GET` / `DELETE` read the query string
//! - `POST` / `PUT` read the body: JSON when the content type says so,
//!   URL-encoded form data, or the verbatim text under a `raw` key
//!
//! Every string leaf has HTML tags stripped and surrounding whitespace
//! trimmed.

use crate::error::{Error, Result};
use crate::json::parse_body;
use crate::router::Method;
use crate::validation::validate;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("tag pattern is valid"));

/// Query parameter that overrides the URI path for routing
pub const PATH_PARAM: &str = "path";

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Parsed query parameters
    query_params: Map<String, Value>,
    /// Request headers
    headers: hyper::HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
}

impl Request {
    /// Create a request by hand (tests, internal use)
    ///
    /// `path` may carry a query string.
    pub fn new(method: Method, path: &str, headers_map: HashMap<String, String>, body: Option<Bytes>) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let query_params = parse_query_string(query);

        let mut headers = hyper::HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                hyper::header::HeaderName::from_bytes(k.as_bytes()),
                hyper::header::HeaderValue::from_str(&v),
            ) {
                headers.insert(n, v);
            }
        }

        Self {
            method,
            path: path.to_string(),
            query_params,
            headers,
            body,
        }
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// `Error::UnsupportedMethod` for methods the router does not know,
    /// `Error::PayloadTooLarge` when the body exceeds `max_body_size`,
    /// `Error::BodyRead` when the body stops mid-transfer.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::try_from(req.method()).map_err(|()| Error::UnsupportedMethod {
            method: req.method().to_string(),
        })?;

        let path = req.uri().path().to_string();
        let query_params = parse_query_string(req.uri().query());

        let headers = req.headers().clone();
        let declared = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(content_len) = declared {
            if content_len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: content_len,
                });
            }
        }

        let body = read_body(req.into_body(), max_body_size).await?;

        Ok(Self {
            method,
            path,
            query_params,
            headers,
            body,
        })
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Decoded query parameters
    #[must_use]
    pub fn query(&self) -> &Map<String, Value> {
        &self.query_params
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Path used for route matching, without surrounding `/`
    ///
    /// The `path` query parameter wins over the URI path, so front-controller
    /// rewrites like `/index.php?path=users/1` route the same as `/users/1`.
    #[must_use]
    pub fn route_path(&self) -> String {
        let path = match self.query_params.get(PATH_PARAM).and_then(Value::as_str) {
            Some(p) => p.to_string(),
            None => urlencoding::decode(&self.path).map_or_else(|_| self.path.clone(), |p| p.into_owned()),
        };
        path.trim_matches('/').to_string()
    }

    /// Parse the request data handed to controllers
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidJson` when a JSON body does not parse.
    pub fn inputs(&self) -> Result<Input> {
        let data = match self.method {
            Method::Get | Method::Delete => self
                .query_params
                .iter()
                .filter(|(k, _)| k.as_str() != PATH_PARAM)
                .map(|(k, v)| (k.clone(), clean(v.clone())))
                .collect(),
            Method::Post | Method::Put => self.body_inputs()?,
            _ => Map::new(),
        };
        Ok(Input::new(data))
    }

    fn body_inputs(&self) -> Result<Map<String, Value>> {
        let Some(body) = self.body_bytes().filter(|b| !b.is_empty()) else {
            return Ok(Map::new());
        };
        let content_type = self.header("content-type").unwrap_or_default().to_ascii_lowercase();

        if content_type.contains("application/json") {
            return Ok(match clean(parse_body(body)?) {
                Value::Object(map) => map,
                other => Map::from_iter([("raw".to_string(), other)]),
            });
        }

        let text = String::from_utf8_lossy(body);
        if content_type.contains("application/x-www-form-urlencoded") {
            Ok(clean_map(parse_query_string(Some(&text))))
        } else {
            Ok(Map::from_iter([("raw".to_string(), Value::String(clean_str(&text)))]))
        }
    }
}

/// Request data handed to controllers: query, body or path parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Input {
    data: Map<String, Value>,
}

impl Input {
    /// Wrap an existing map
    #[must_use]
    pub const fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Build from string pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), Value::String(v.into()))).collect())
    }

    /// Everything
    #[must_use]
    pub const fn all(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Take the underlying map
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.data
    }

    /// One value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// One value, if it is a string
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Whether the key is present and not null
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(|v| !v.is_null())
    }

    /// Validate against `(field, "rule|rule:arg")` pairs
    ///
    /// Returns the data on success.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` listing the first failure per field.
    pub fn validate(&self, rules: &[(&str, &str)]) -> Result<Map<String, Value>> {
        validate(&self.data, rules).map_err(Error::Validation)?;
        Ok(self.data.clone())
    }
}

impl From<HashMap<String, String>> for Input {
    fn from(params: HashMap<String, String>) -> Self {
        let mut pairs: Vec<_> = params.into_iter().collect();
        pairs.sort();
        Self::from_pairs(pairs)
    }
}

/// Collect a body, enforcing the size limit
///
/// An empty body reads as `None`.
async fn read_body<B>(body: B, max_body_size: usize) -> Result<Option<Bytes>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let bytes = BodyExt::collect(body)
        .await
        .map_err(|e| Error::BodyRead { reason: e.to_string() })?
        .to_bytes();
    if bytes.len() > max_body_size {
        return Err(Error::PayloadTooLarge {
            limit: max_body_size,
            actual: bytes.len(),
        });
    }
    Ok((!bytes.is_empty()).then_some(bytes))
}

/// Parse query string into an ordered map
///
/// Later duplicates win; `key[]=v` collects into an array.
fn parse_query_string(query: Option<&str>) -> Map<String, Value> {
    let mut params = Map::new();
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = url_decode(key);
        let value = Value::String(url_decode(value));

        if let Some(name) = key.strip_suffix("[]") {
            match params.entry(name.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(items) => items.push(value),
                slot => *slot = Value::Array(vec![value]),
            }
        } else {
            params.insert(key, value);
        }
    }
    params
}

fn url_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced).map_or_else(|_| spaced.clone(), |d| d.into_owned())
}

fn clean_str(s: &str) -> String {
    TAGS.replace_all(s, "").trim().to_string()
}

fn clean_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (k, clean(v))).collect()
}

fn clean(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_str(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(clean).collect()),
        Value::Object(map) => Value::Object(clean_map(map)),
        other => other,
    }
}
