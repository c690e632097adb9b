use std::time::Duration;

use clap::Args;
use url::Url;

use crate::decoder::DecompressionBackend;

pub const DEFAULT_URL: &str = "ws://localhost:8081/ws";
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;

/// Connection options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// WebSocket endpoint of the central server
    #[arg(long, global = true, env = "FLEETVIEW_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Seconds to wait for a full sync to finish before flagging it
    #[arg(long, global = true, default_value_t = DEFAULT_SYNC_TIMEOUT_SECS)]
    pub sync_timeout_secs: u64,

    /// Seconds to wait before reconnecting after the connection drops
    #[arg(long, global = true, default_value_t = DEFAULT_RECONNECT_DELAY_SECS)]
    pub reconnect_delay_secs: u64,

    /// Gzip backend used for binary frames
    #[arg(long, global = true, value_enum, default_value_t = DecompressionBackend::Streaming)]
    pub decompression: DecompressionBackend,
}

impl Default for ConnectArgs {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            decompression: DecompressionBackend::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Validated client settings handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub url: Url,
    pub sync_timeout: Duration,
    pub reconnect_delay: Duration,
    pub decompression: DecompressionBackend,
}

impl ClientConfig {
    pub fn from_args(args: &ConnectArgs) -> Result<Self, ConfigError> {
        if args.sync_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("sync timeout"));
        }
        if args.reconnect_delay_secs == 0 {
            return Err(ConfigError::ZeroDuration("reconnect delay"));
        }
        Ok(Self {
            url: parse_server_url(&args.url)?,
            sync_timeout: Duration::from_secs(args.sync_timeout_secs),
            reconnect_delay: Duration::from_secs(args.reconnect_delay_secs),
            decompression: args.decompression,
        })
    }
}

pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}
