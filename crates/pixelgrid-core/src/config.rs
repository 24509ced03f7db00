//! Client configuration.

use crate::grid::{DEFAULT_CELL_SIZE, DEFAULT_GRID_SIZE, GridGeometry};
use crate::protocol::PIXEL_TABLE_QUERY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default connection deadline: 100 readiness checks at 100ms.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

/// Settings for one grid client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the pixel table server.
    pub uri: String,
    /// Short-lived access token, passed through untouched.
    pub token: Option<String>,
    pub grid_size: u32,
    pub cell_size: f64,
    pub connect_timeout_ms: u64,
    pub subscription_query: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: "ws://localhost:3030/ws".to_string(),
            token: None,
            grid_size: DEFAULT_GRID_SIZE,
            cell_size: DEFAULT_CELL_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            subscription_query: PIXEL_TABLE_QUERY.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(self.grid_size, self.cell_size)
    }

    /// Endpoint URL with the token attached as a query parameter.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.uri).map_err(|e| ConfigError::Endpoint(e.to_string()))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigError::Endpoint(format!("Invalid WebSocket URL scheme: {}", url.scheme())));
        }
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ClientConfig::from_json_str(r#"{"uri": "wss://grid.example/ws"}"#).unwrap();
        assert_eq!(config.grid_size, 32);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.geometry().surface_size(), 480.0);
    }

    #[test]
    fn test_endpoint_carries_token() {
        let config = ClientConfig::default().with_token("abc.def");
        let url = config.endpoint().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3030/ws?token=abc.def");
    }

    #[test]
    fn test_endpoint_rejects_http() {
        let config = ClientConfig { uri: "http://localhost:3030".into(), ..Default::default() };
        assert!(matches!(config.endpoint(), Err(ConfigError::Endpoint(_))));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(ClientConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }
}
