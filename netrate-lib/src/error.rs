use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level failure of a processing run.
///
/// Timeouts and undecodable packets are expected conditions and never show up
/// here; only faults that end the run do.
#[derive(Debug, Error)]
pub enum Error {
    #[error("capture error: {0}")]
    Source(#[from] SourceError),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Faults raised by an upstream packet source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("pcap: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Rejected configuration values.
///
/// Callers on the command-line path report these and fall back to a default;
/// library constructors return them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown prefix '{0}'")]
    UnknownPrefix(char),

    #[error("invalid number \"{0}\"")]
    InvalidNumber(String),

    #[error("value must be positive, got {0}")]
    NotPositive(f64),

    #[error("unrecognised level \"{0}\"")]
    UnknownLevel(String),

    #[error("unrecognised formatter \"{0}\"")]
    UnknownFormat(String),

    #[error("timescale must be at least 2")]
    InvalidTimescale,

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Packet-local failure to find a payload size at the requested level.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported link type {0}")]
    UnsupportedLinkType(i32),

    #[error("unknown ethertype 0x{0:04x}")]
    UnknownEtherType(u16),

    #[error("unsupported transport protocol {0}")]
    UnsupportedTransport(u8),

    #[error("truncated {0} header")]
    Truncated(&'static str),
}
