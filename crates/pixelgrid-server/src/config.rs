//! Server configuration from the environment.

use pixelgrid_core::grid::DEFAULT_GRID_SIZE;
use pixelgrid_core::rate_limit::RateLimitPolicy;
use std::collections::HashSet;
use std::net::SocketAddr;
use tracing::warn;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Shared token clients must pass as `?token=`; open when unset.
    pub token: Option<String>,
    /// External ids allowed to clear the grid.
    pub admins: HashSet<String>,
    pub grid_size: u32,
    pub policy: RateLimitPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            token: None,
            admins: HashSet::new(),
            grid_size: DEFAULT_GRID_SIZE,
            policy: RateLimitPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Read `PIXELGRID_ADDR`, `PIXELGRID_TOKEN`, `PIXELGRID_ADMINS` and
    /// `PIXELGRID_GRID_SIZE`. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let addr_str = lookup("PIXELGRID_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_str.parse().unwrap_or_else(|e| {
            warn!("Invalid PIXELGRID_ADDR {:?}: {}", addr_str, e);
            defaults.addr
        });

        let token = lookup("PIXELGRID_TOKEN").filter(|t| !t.is_empty());

        let admins = lookup("PIXELGRID_ADMINS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let grid_size = match lookup("PIXELGRID_GRID_SIZE") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    warn!("Invalid PIXELGRID_GRID_SIZE {:?}", raw);
                    defaults.grid_size
                }
            },
            None => defaults.grid_size,
        };

        Self { addr, token, admins, grid_size, policy: defaults.policy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.addr.port(), 3030);
        assert_eq!(config.grid_size, 32);
        assert!(config.token.is_none());
        assert!(config.admins.is_empty());
    }

    #[test]
    fn test_admin_list_and_overrides() {
        let config = config(&[
            ("PIXELGRID_ADMINS", "user_1, user_2,,"),
            ("PIXELGRID_GRID_SIZE", "16"),
            ("PIXELGRID_ADDR", "127.0.0.1:4000"),
            ("PIXELGRID_TOKEN", "secret"),
        ]);
        assert_eq!(config.admins.len(), 2);
        assert!(config.admins.contains("user_2"));
        assert_eq!(config.grid_size, 16);
        assert_eq!(config.addr.port(), 4000);
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config(&[("PIXELGRID_GRID_SIZE", "0"), ("PIXELGRID_ADDR", "nowhere")]);
        assert_eq!(config.grid_size, 32);
        assert_eq!(config.addr.port(), 3030);
    }
}
