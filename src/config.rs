//! TOML configuration for the reactor, the listener and logging.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Unknown fields are rejected.

use crate::acceptor::DEFAULT_BACKLOG;
use crate::buffer::DEFAULT_CHUNK_SIZE;
use crate::builder::ReactorConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub reactor: ReactorSection,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[reactor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactorSection {
    /// Readiness events collected per poll.
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,

    /// Set TCP_NODELAY on accepted and connected streams.
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    #[serde(default)]
    pub buffer: BufferConfig,
}

impl Default for ReactorSection {
    fn default() -> Self {
        Self {
            events_capacity: default_events_capacity(),
            tcp_nodelay: true,
            buffer: BufferConfig::default(),
        }
    }
}

/// `[reactor.buffer]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Capacity of each pooled chunk (e.g. "4KB").
    #[serde(default = "default_chunk_size", deserialize_with = "deserialize_size")]
    pub chunk_size: usize,

    /// Chunks allocated up front.
    #[serde(default)]
    pub preallocate: usize,

    /// Upper bound on retained free chunks.
    #[serde(default)]
    pub max_free: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            preallocate: 0,
            max_free: None,
        }
    }
}

/// `[listener]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_address")]
    pub address: SocketAddr,

    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "chunkio=debug".
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the module target in each event.
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_events_capacity() -> usize {
    1024
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7878))
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_level() -> String {
    "info".to_string()
}

/// Deserialize a size string like "4KB" or a plain number into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "4KB", "64MB" or "1GiB" into bytes.
pub fn parse_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reactor.buffer.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.reactor.events_capacity == 0 {
            return Err(Error::Config("events_capacity must be positive".into()));
        }
        if self.listener.backlog <= 0 {
            return Err(Error::Config(format!(
                "backlog must be positive, got {}",
                self.listener.backlog
            )));
        }
        if let Some(max_free) = self.reactor.buffer.max_free
            && max_free < self.reactor.buffer.preallocate
        {
            return Err(Error::Config(format!(
                "max_free ({}) must be at least preallocate ({})",
                max_free, self.reactor.buffer.preallocate
            )));
        }
        Ok(())
    }

    /// Reactor settings derived from the `[reactor]` section.
    pub fn reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            chunk_size: self.reactor.buffer.chunk_size,
            preallocate: self.reactor.buffer.preallocate,
            max_free: self.reactor.buffer.max_free,
            events_capacity: self.reactor.events_capacity,
            tcp_nodelay: self.reactor.tcp_nodelay,
        }
    }
}
