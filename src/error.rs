use std::io;

/// Errors raised synchronously by the transport.
///
/// Asynchronous failures (reads, writes, accepts, connects) are delivered to
/// handlers as `std::io::Error` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },
    #[error("failed to open listener socket: {0}")]
    Open(#[source] io::Error),
    #[error("failed to set SO_REUSEADDR: {0}")]
    ReuseAddress(#[source] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
    #[error("failed to register with reactor: {0}")]
    Register(#[source] io::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
