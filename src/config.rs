// Session configuration.
// The default log level depends on the build profile.

use crate::error::{Error, Result};
use crate::peer::state::{REQUEST_TIMEOUT, STATS_INTERVAL};
use crate::peer::types::{MediaConstraints, ServerConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

fn default_trickle() -> bool {
    true
}

fn default_stats_interval_ms() -> u64 {
    STATS_INTERVAL.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT.as_millis() as u64
}

/// Everything a publish or view attempt needs, fixed at session start.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Empty means the built-in STUN servers.
    #[serde(default)]
    pub ice_servers: Vec<ServerConfig>,
    #[serde(default)]
    pub media: MediaConstraints,
    /// When false the offer waits for complete gathering and nothing is PATCHed.
    #[serde(default = "default_trickle")]
    pub trickle: bool,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            auth_token: None,
            ice_servers: Vec::new(),
            media: MediaConstraints::default(),
            trickle: default_trickle(),
            stats_interval_ms: default_stats_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Checks the config and returns the parsed endpoint.
    pub fn validate(&self) -> Result<Url> {
        let raw = self.endpoint_url.trim();
        if raw.is_empty() {
            return Err(Error::Config("endpoint URL is missing".into()));
        }
        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("invalid endpoint URL {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint URL must be http(s), got {}",
                url.scheme()
            )));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config("ICE server URL cannot be empty".into()));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "TURN server {} requires username and credential",
                    server.url
                )));
            }
        }

        if self.stats_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::Config("intervals must be greater than zero".into()));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SessionConfig {
        SessionConfig {
            endpoint_url: url.into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_endpoint_is_returned() {
        let url = config(" https://live.example.com/whip/room1 ").validate().unwrap();
        assert_eq!(url.path(), "/whip/room1");
    }

    #[test]
    fn missing_or_foreign_endpoint_is_config_error() {
        for bad in ["", "   ", "not a url", "ftp://example.com/whip"] {
            let err = config(bad).validate().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad:?} gave {err}");
        }
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let mut c = config("https://example.com/whip");
        c.ice_servers.push(ServerConfig {
            r#type: "turn".into(),
            url: "turn.example.com:3478".into(),
            username: Some("user".into()),
            credential: None,
        });
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut c = config("https://example.com/whip");
        c.stats_interval_ms = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn json_defaults() {
        let c: SessionConfig = serde_json::from_str(
            r#"{"endpoint_url": "http://localhost:8080/whep", "media": {"video_codec": "video/VP9"}}"#,
        )
        .unwrap();
        assert!(c.trickle);
        assert_eq!(c.stats_interval(), Duration::from_secs(1));
        assert_eq!(c.request_timeout(), Duration::from_secs(10));
        assert_eq!(c.media.video_codec.as_deref(), Some("video/VP9"));
        assert!(c.media.video.is_auto());
    }
}
