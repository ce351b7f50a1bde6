use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Secrets that ship in sample env files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret", ""];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GATHER_JWT_SECRET must be set")]
    MissingSecret,
    #[error("GATHER_JWT_SECRET is a placeholder, set a real secret")]
    PlaceholderSecret,
    #[error("{name} is invalid: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub maps_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("GATHER_JWT_SECRET").ok_or(ConfigError::MissingSecret)?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            return Err(ConfigError::PlaceholderSecret);
        }

        let db_path = lookup("GATHER_DB_PATH").unwrap_or_else(|| "gather.db".into());
        let host = lookup("GATHER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = lookup("GATHER_PORT").unwrap_or_else(|| "3000".into());

        let port: u16 = port.parse().map_err(|_| ConfigError::Invalid {
            name: "GATHER_PORT",
            value: port.clone(),
        })?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "GATHER_HOST",
                value: host.clone(),
            })?;

        let maps_api_key = lookup("MAPS_API_KEY").filter(|k| !k.trim().is_empty());

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            maps_api_key,
        })
    }
}
