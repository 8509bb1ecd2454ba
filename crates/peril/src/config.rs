//! Process configuration from the environment.

use std::env;
use std::path::PathBuf;

use peril_pubsub::{DEFAULT_PREFETCH, DecodeFailurePolicy, SubscribeOptions};
use url::Url;

use crate::PerilError;

pub const DEFAULT_BROKER_URL: &str = "ws://guest:guest@127.0.0.1:5672";
pub const DEFAULT_GAME_LOG_PATH: &str = "game.log";

/// Settings shared by the client and server processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerilConfig {
    /// `ws://user:pass@host:port` of the broker.
    pub broker_url: String,
    pub prefetch: u16,
    /// Where the server appends war log lines.
    pub game_log_path: PathBuf,
    pub decode_policy: DecodeFailurePolicy,
}

impl Default for PerilConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            prefetch: DEFAULT_PREFETCH,
            game_log_path: PathBuf::from(DEFAULT_GAME_LOG_PATH),
            decode_policy: DecodeFailurePolicy::Fatal,
        }
    }
}

impl PerilConfig {
    /// Reads the configuration from environment variables, after loading
    /// `.env` if there is one.
    ///
    /// Environment variables:
    /// - `PERIL_BROKER_URL` - broker URL (default: `ws://guest:guest@127.0.0.1:5672`)
    /// - `PERIL_PREFETCH` - unacknowledged deliveries per subscription (default: 10)
    /// - `PERIL_GAME_LOG_PATH` - war log file (default: `game.log`)
    /// - `PERIL_DECODE_POLICY` - `fatal` or `discard` (default: `fatal`)
    pub fn from_env() -> Result<Self, PerilError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PerilError> {
        let mut config = Self::default();

        if let Some(url) = lookup("PERIL_BROKER_URL") {
            BrokerUrl::parse(&url)?;
            config.broker_url = url;
        }
        if let Some(prefetch) = lookup("PERIL_PREFETCH") {
            config.prefetch = prefetch
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    PerilError::Config(format!("PERIL_PREFETCH must be a positive integer, got '{prefetch}'"))
                })?;
        }
        if let Some(path) = lookup("PERIL_GAME_LOG_PATH") {
            config.game_log_path = PathBuf::from(path);
        }
        if let Some(policy) = lookup("PERIL_DECODE_POLICY") {
            config.decode_policy = match policy.trim().to_ascii_lowercase().as_str() {
                "fatal" => DecodeFailurePolicy::Fatal,
                "discard" => DecodeFailurePolicy::Discard,
                other => {
                    return Err(PerilError::Config(format!(
                        "PERIL_DECODE_POLICY must be 'fatal' or 'discard', got '{other}'"
                    )));
                }
            };
        }

        Ok(config)
    }

    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            prefetch: self.prefetch,
            decode_failure: self.decode_policy,
        }
    }
}

/// A broker URL split into the WebSocket address and the credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerUrl {
    /// `ws://host:port[/path]` without credentials.
    pub address: String,
    pub username: String,
    pub password: String,
    socket: String,
}

impl BrokerUrl {
    /// Parses `ws://user:pass@host:port`. Credentials are optional and
    /// default to `guest`/`guest`; percent-encoded characters in them are
    /// decoded. A missing port falls back to the scheme's default.
    pub fn parse(raw: &str) -> Result<Self, PerilError> {
        let url = Url::parse(raw)
            .map_err(|e| PerilError::Config(format!("invalid broker URL '{raw}': {e}")))?;

        let scheme = url.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(PerilError::Config(format!(
                "broker URL scheme must be ws or wss, got '{scheme}'"
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PerilError::Config(format!("broker URL '{raw}' has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| PerilError::Config(format!("broker URL '{raw}' has no port")))?;

        let (username, password) = match (url.username(), url.password()) {
            ("", None) => ("guest".to_string(), "guest".to_string()),
            ("", Some(_)) => {
                return Err(PerilError::Config(format!("broker URL '{raw}' has an empty username")));
            }
            (user, pass) => (decode(user)?, decode(pass.unwrap_or(""))?),
        };

        let socket = format!("{host}:{port}");
        let address = match url.path() {
            "" | "/" => format!("{scheme}://{socket}"),
            path => format!("{scheme}://{socket}{path}"),
        };

        Ok(Self {
            address,
            username,
            password,
            socket,
        })
    }

    /// `host:port` without scheme or path, for binding a listener.
    pub fn socket_address(&self) -> &str {
        &self.socket
    }
}

fn decode(component: &str) -> Result<String, PerilError> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| PerilError::Config(format!("broker URL credentials are not UTF-8: {e}")))
}
