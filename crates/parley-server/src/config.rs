//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{
    CODE_TTL_SECS, DEFAULT_CHAT_PORT, DEFAULT_HTTP_PORT, MAX_FILE_SIZE,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the chat listener binds to.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:5555`
    pub listen_addr: SocketAddr,

    /// Socket address for the HTTP (axum) status API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Directory where attachments are stored.
    /// Env: `FILE_STORAGE_PATH`
    /// Default: `./files`
    pub file_storage_path: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_FILE_SIZE`
    pub max_file_size: usize,

    /// Lifetime of a one-time login code.
    /// Env: `CODE_TTL_SECS`
    /// Default: 300
    pub code_ttl: Duration,

    /// Wrong codes accepted before the pending login is discarded.
    /// Env: `MAX_CODE_ATTEMPTS`
    /// Default: 5
    pub max_code_attempts: u32,

    /// Sustained authentication attempts per second per IP.
    /// Env: `AUTH_RATE`
    pub auth_rate: f64,

    /// Authentication burst size per IP.
    /// Env: `AUTH_BURST`
    pub auth_burst: f64,

    /// Frames buffered per connection before forwards to it are dropped.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: 256
    pub outbound_queue: usize,

    /// How long shutdown waits for connection tasks to finish.
    /// Env: `SHUTDOWN_GRACE_SECS`
    /// Default: 5
    pub shutdown_grace: Duration,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Node"`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_CHAT_PORT).into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            file_storage_path: PathBuf::from("./files"),
            max_file_size: MAX_FILE_SIZE,
            code_ttl: Duration::from_secs(CODE_TTL_SECS),
            max_code_attempts: 5,
            auth_rate: 1.0,
            auth_burst: 10.0,
            outbound_queue: 256,
            shutdown_grace: Duration::from_secs(5),
            instance_name: "Parley Node".to_string(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        parse_into(&lookup, "LISTEN_ADDR", &mut config.listen_addr);
        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }

        parse_into(&lookup, "MAX_FILE_SIZE", &mut config.max_file_size);

        let mut ttl_secs = config.code_ttl.as_secs();
        parse_into(&lookup, "CODE_TTL_SECS", &mut ttl_secs);
        config.code_ttl = Duration::from_secs(ttl_secs);

        parse_into(&lookup, "MAX_CODE_ATTEMPTS", &mut config.max_code_attempts);
        parse_into(&lookup, "AUTH_RATE", &mut config.auth_rate);
        parse_into(&lookup, "AUTH_BURST", &mut config.auth_burst);
        parse_into(&lookup, "OUTBOUND_QUEUE", &mut config.outbound_queue);
        if config.outbound_queue == 0 {
            tracing::warn!("OUTBOUND_QUEUE must be positive, using 1");
            config.outbound_queue = 1;
        }

        let mut grace_secs = config.shutdown_grace.as_secs();
        parse_into(&lookup, "SHUTDOWN_GRACE_SECS", &mut grace_secs);
        config.shutdown_grace = Duration::from_secs(grace_secs);

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Overwrite `target` with the parsed value of `key`, keeping the current
/// value (and logging) when it does not parse.
fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 5555).into());
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.code_ttl, Duration::from_secs(300));
        assert_eq!(config.max_code_attempts, 5);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("LISTEN_ADDR", "127.0.0.1:7000"),
            ("DATABASE_PATH", "/var/lib/parley/chat.db"),
            ("CODE_TTL_SECS", "60"),
            ("MAX_CODE_ATTEMPTS", "3"),
            ("ADMIN_TOKEN", "s3cret"),
        ]));

        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 7000).into());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/parley/chat.db"));
        assert_eq!(config.code_ttl, Duration::from_secs(60));
        assert_eq!(config.max_code_attempts, 3);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not-an-address"),
            ("MAX_FILE_SIZE", "-1"),
            ("OUTBOUND_QUEUE", "0"),
            ("ADMIN_TOKEN", ""),
        ]));

        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_file_size, MAX_FILE_SIZE);
        assert_eq!(config.outbound_queue, 1);
        assert!(config.admin_token.is_none());
    }
}
