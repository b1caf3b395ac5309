//! Server configuration
//!
//! Read once at startup from the process environment, after loading a
//! `.env` file if one exists.

use std::env;

use crate::error::ConfigError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 5000;
const DEFAULT_CONNECTION_STARTING_PORT: u16 = 5001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Interface the public and per-client listeners bind to (`HOST`)
    pub host: String,

    /// Public bootstrap port (`SERVER_PORT`)
    pub port: u16,

    /// First per-client port handed out (`CONNECTION_STARTING_PORT`)
    pub connection_starting_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            connection_starting_port: DEFAULT_CONNECTION_STARTING_PORT,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let host = lookup("HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(defaults.host);
        let port = parse_port(&lookup, "SERVER_PORT", defaults.port)?;
        let connection_starting_port = parse_port(
            &lookup,
            "CONNECTION_STARTING_PORT",
            defaults.connection_starting_port,
        )?;

        let config = Self {
            host,
            port,
            connection_starting_port,
        };
        config.validate()?;
        Ok(config)
    }

    /// Per-client ports count up from the starting port and must stay above
    /// the public port. A public port of 0 (OS-assigned) is not checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port != 0 && self.connection_starting_port <= self.port {
            return Err(ConfigError::PortOverlap {
                server: self.port,
                starting: self.connection_starting_port,
            });
        }
        Ok(())
    }

    /// `host:port` for the public listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port<F>(lookup: &F, name: &'static str, default: u16) -> Result<u16, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort { name, value }),
    }
}
