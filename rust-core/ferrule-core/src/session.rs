//! # Sessions
//!
//! Server-side session storage keyed by a cookie.
//!
//! Stores are shared across requests and must be `Send + Sync`; the bundled
//! [`MemorySessionStore`] keeps everything in process memory.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    /// Only sent for same-site requests
    #[default]
    Strict,
    /// Sent on top-level navigations
    Lax,
    /// Always sent (requires `Secure` in browsers)
    None,
}

impl std::fmt::Display for SameSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Lax => write!(f, "Lax"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Session cookie settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cookie carrying the session id
    pub cookie_name: String,
    /// Cookie lifetime in seconds; 0 ends with the browser session
    pub lifetime: u64,
    /// Mark the cookie `Secure`
    pub secure: bool,
    /// Mark the cookie `HttpOnly`
    pub http_only: bool,
    /// `SameSite` policy
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "FERRULE_SESSION".to_string(),
            lifetime: 0,
            secure: false,
            http_only: false,
            same_site: SameSite::Strict,
        }
    }
}

impl SessionConfig {
    /// `Set-Cookie` header value for a session id
    #[must_use]
    pub fn cookie_header(&self, id: &str) -> String {
        let mut cookie = format!("{}={}; Path=/", self.cookie_name, id);
        if self.lifetime > 0 {
            cookie.push_str(&format!("; Max-Age={}", self.lifetime));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str(&format!("; SameSite={}", self.same_site));
        cookie
    }

    /// Session id sent by the client in a `Cookie` header
    #[must_use]
    pub fn session_id<'a>(&self, cookie_header: Option<&'a str>) -> Option<&'a str> {
        cookie_header?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Backing store for session data
pub trait SessionStore: Send + Sync {
    /// Whether a session with this id exists
    fn exists(&self, id: &str) -> bool;

    /// Start a new empty session and return its id
    fn create(&self) -> String;

    /// Value stored under `key` in the session
    fn get(&self, id: &str, key: &str) -> Option<Value>;

    /// Store `value` under `key`, creating the session if needed
    fn put(&self, id: &str, key: &str, value: Value);

    /// Drop a session; returns whether it existed
    fn destroy(&self, id: &str) -> bool;
}

/// One stored session
#[derive(Debug, Clone)]
struct Entry {
    touched: Instant,
    values: HashMap<String, Value>,
}

impl Entry {
    fn new() -> Self {
        Self {
            touched: Instant::now(),
            values: HashMap::new(),
        }
    }
}

/// In-process session store
///
/// With a time-to-live, sessions idle for longer than it are treated as gone
/// and swept on the next write.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Option<Duration>,
}

impl MemorySessionStore {
    /// Create an empty store whose sessions never expire
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store expiring sessions idle for longer than `ttl`
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Expire sessions after the cookie lifetime, or never when it is 0
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        match config.lifetime {
            0 => Self::new(),
            secs => Self::with_ttl(Duration::from_secs(secs)),
        }
    }

    /// Number of stored sessions, including expired ones not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no sessions are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired session and return how many went
    pub fn purge_expired(&self) -> usize {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut data)
    }

    fn expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.touched.elapsed() > ttl)
    }

    fn sweep(&self, data: &mut HashMap<String, Entry>) -> usize {
        let before = data.len();
        data.retain(|_, entry| !self.expired(entry));
        let swept = before - data.len();
        if swept > 0 {
            debug!(swept, "Expired sessions removed");
        }
        swept
    }

    /// Run `f` on a live session, refreshing its idle timer
    fn touch<T>(&self, id: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match data.get_mut(id) {
            Some(entry) if !self.expired(entry) => {
                entry.touched = Instant::now();
                return Some(f(entry));
            }
            Some(_) => {}
            None => return None,
        }
        data.remove(id);
        None
    }
}

impl SessionStore for MemorySessionStore {
    fn exists(&self, id: &str) -> bool {
        self.touch(id, |_| ()).is_some()
    }

    fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut data);
        data.insert(id.clone(), Entry::new());
        id
    }

    fn get(&self, id: &str, key: &str) -> Option<Value> {
        self.touch(id, |entry| entry.values.get(key).cloned()).flatten()
    }

    fn put(&self, id: &str, key: &str, value: Value) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut data);
        let entry = data.entry(id.to_string()).or_insert_with(Entry::new);
        entry.touched = Instant::now();
        entry.values.insert(key.to_string(), value);
    }

    fn destroy(&self, id: &str) -> bool {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
