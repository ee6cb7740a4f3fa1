//! # Configuration
//!
//! Application settings read from the process environment, optionally seeded
//! from a `.env` file via `dotenvy`.

use crate::error::{Error, Result};
use crate::session::{SameSite, SessionConfig};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// One named database and where to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Name controllers look the connection up by
    pub name: String,
    /// sqlx connection URL
    pub url: String,
}

/// The set of named databases; the first entry is the default
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Connections in declaration order
    pub connections: Vec<ConnectionConfig>,
}

/// Token verification settings
#[derive(Clone)]
pub struct AuthConfig {
    /// Shared HMAC secret
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("jwt_secret", &"<redacted>").finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "default-secret".to_string(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Named database connections
    pub database: DatabaseConfig,
    /// Bearer-token settings
    pub auth: AuthConfig,
    /// Session cookie settings
    pub session: SessionConfig,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Config {
    /// Load `.env` (if present) and then read the environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for malformed values.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(Error::Config {
                    message: format!("Failed to read .env: {e}"),
                })
            }
        }
        Self::from_env()
    }

    /// Read configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for malformed values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host: IpAddr = parse_or(get("APP_HOST"), "APP_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port: u16 = parse_or(get("APP_PORT"), "APP_PORT", 8000)?;
        let server = ServerConfig {
            address: SocketAddr::new(host, port),
            max_body_size: parse_or(get("MAX_BODY_SIZE"), "MAX_BODY_SIZE", 1024 * 1024)?,
            ..ServerConfig::default()
        };

        let template = get("DB_URL");
        let connections = get("DB_CONNECTIONS")
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|name| {
                        let url = get(&format!("DB_URL_{}", name.to_uppercase()))
                            .or_else(|| template.as_ref().map(|t| t.replace("{name}", name)))
                            .unwrap_or_else(|| format!("sqlite://{name}.db?mode=rwc"));
                        ConnectionConfig {
                            name: name.to_string(),
                            url,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let auth = AuthConfig {
            jwt_secret: get("JWT_SECRET").unwrap_or_else(|| AuthConfig::default().jwt_secret),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            cookie_name: get("AUTH_SESSION_NAME").unwrap_or(defaults.cookie_name),
            lifetime: parse_or(get("AUTH_SESSION_LIFETIME"), "AUTH_SESSION_LIFETIME", defaults.lifetime)?,
            secure: get("AUTH_SESSION_SECURE").map_or(Ok(defaults.secure), |v| parse_flag("AUTH_SESSION_SECURE", &v))?,
            http_only: get("AUTH_SESSION_HTTPONLY")
                .map_or(Ok(defaults.http_only), |v| parse_flag("AUTH_SESSION_HTTPONLY", &v))?,
            same_site: parse_or(get("AUTH_SESSION_SAMESITE"), "AUTH_SESSION_SAMESITE", defaults.same_site)?,
        };

        Ok(Self {
            server,
            database: DatabaseConfig { connections },
            auth,
            session,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    raw.map_or(Ok(default), |v| {
        v.trim().parse().map_err(|_| Error::Config {
            message: format!("{key} has an invalid value: {v}"),
        })
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config {
            message: format!("{key} must be a boolean, got {raw}"),
        }),
    }
}

impl FromStr for SameSite {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}
