//! Server configuration loaded from environment variables

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Which registry/bus implementation to run against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Shared Redis instance, safe for several server processes
    Redis { url: String },
    /// In-process store, single server only
    Memory,
}

/// Limits applied to every session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Longest display name accepted, in characters
    pub max_name_len: usize,
    /// Longest inbound line accepted, in bytes
    pub max_line_len: usize,
    /// Outbound lines buffered per connection before it is evicted
    pub outbound_queue: usize,
    /// Budget for a single socket write
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_name_len: 32,
            max_line_len: 4096,
            outbound_queue: 64,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub backend: Backend,
    /// Budget for a single registry or bus call
    pub store_timeout: Duration,
    /// How long sessions get to release their names on shutdown
    pub shutdown_grace: Duration,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backend: Backend::Redis {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            store_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let listen_addr = match env_trimmed("CHAT_LISTEN_ADDR") {
            Some(addr) => addr.parse().map_err(|_| ConfigError::Invalid {
                var: "CHAT_LISTEN_ADDR",
                value: addr,
            })?,
            None => defaults.listen_addr,
        };

        let backend = match env_trimmed("CHAT_BACKEND").as_deref() {
            None | Some("redis") => Backend::Redis {
                url: env_trimmed("REDIS_URL")
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            },
            Some("memory") => Backend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "CHAT_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let session = SessionConfig {
            max_name_len: env_parse("CHAT_MAX_NAME_LEN", defaults.session.max_name_len),
            max_line_len: env_parse("CHAT_MAX_LINE_LEN", defaults.session.max_line_len),
            outbound_queue: env_parse("CHAT_OUTBOUND_QUEUE", defaults.session.outbound_queue)
                .max(1),
            write_timeout: env_millis("CHAT_WRITE_TIMEOUT_MS", defaults.session.write_timeout),
        };

        Ok(Self {
            listen_addr,
            backend,
            store_timeout: env_millis("CHAT_STORE_TIMEOUT_MS", defaults.store_timeout),
            shutdown_grace: env_millis("CHAT_SHUTDOWN_GRACE_MS", defaults.shutdown_grace),
            session,
        })
    }
}

fn env_trimmed(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn env_parse<T: FromStr + Copy>(var: &str, default: T) -> T {
    match env_trimmed(var) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparseable {}={:?}, using default", var, raw);
            default
        }),
        None => default,
    }
}

fn env_millis(var: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(var, default.as_millis() as u64))
}
