// Error types for the relay crate.
//
// `ChannelError` covers the client-side `Channel`, `AdmitError` the relay's
// slot table, and `ConfigError` loading of `RelayConfig` / `ChannelConfig`.
// Per-frame decode failures are not errors at this level: both sides log and
// drop them (see `ProtocolError::is_recoverable`).

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("both player slots are taken")]
    Full,
    #[error("a player has left; the session takes no new players")]
    Vacated,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}
