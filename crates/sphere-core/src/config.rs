//! Client configuration.
//!
//! One externally supplied base address for the REST service. The live
//! channel address is derived from it by dropping the API path suffix.

use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Path suffix the REST base address carries and the channel address lacks.
pub const API_PATH_SUFFIX: &str = "/api/v1";

/// Socket.IO handshake path and query for the WebSocket transport.
const SOCKET_IO_PATH: &str = "/socket.io/";
const SOCKET_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Default request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration needed by the gateway and the live channel.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base address, e.g. `https://social.example.com/api/v1`
    pub api_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base address of the push endpoint (API base without its path suffix).
    pub fn channel_base(&self) -> String {
        match self.api_url.strip_suffix(API_PATH_SUFFIX) {
            Some(base) => base.to_string(),
            None => self.api_url.clone(),
        }
    }

    /// WebSocket URL for the Socket.IO transport.
    pub fn channel_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.channel_base())
            .map_err(|e| Error::Config(format!("invalid API url {}: {}", self.api_url, e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::Config(format!("unsupported URL scheme: {}", other)));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("cannot use scheme {} for {}", scheme, url)))?;

        let path = format!("{}{}", url.path().trim_end_matches('/'), SOCKET_IO_PATH);
        url.set_path(&path);
        url.set_query(Some(SOCKET_IO_QUERY));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_base_strips_api_suffix() {
        let config = ClientConfig::new("https://social.example.com/api/v1");
        assert_eq!(config.channel_base(), "https://social.example.com");
    }

    #[test]
    fn test_channel_base_without_suffix_is_unchanged() {
        let config = ClientConfig::new("http://localhost:5000/");
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.channel_base(), "http://localhost:5000");
    }

    #[test]
    fn test_channel_url_switches_scheme() {
        let url = ClientConfig::new("https://social.example.com/api/v1")
            .channel_url()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://social.example.com/socket.io/?EIO=4&transport=websocket"
        );

        let url = ClientConfig::new("http://localhost:5000/api/v1")
            .channel_url()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_channel_url_rejects_unknown_scheme() {
        let result = ClientConfig::new("ftp://example.com/api/v1").channel_url();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
