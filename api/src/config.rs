use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::ingest::DEFAULT_CHUNK_SIZE;

const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/spotifystats";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub chunk_size: usize,
    pub db_max_connections: u32,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Read configuration from the process environment (after `.env` loading).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let bind_addr = parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse::<SocketAddr>()?)?;
        let chunk_size = parse_or(&lookup, "CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        if chunk_size == 0 {
            return Err(anyhow!("CHUNK_SIZE must be greater than zero"));
        }
        if db_max_connections == 0 {
            return Err(anyhow!("DB_MAX_CONNECTIONS must be greater than zero"));
        }

        Ok(Self {
            database_url,
            bind_addr,
            chunk_size,
            db_max_connections,
            max_upload_bytes,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, "0.0.0.0:3001".parse().unwrap());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.max_upload_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "sqlite://history.db"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("CHUNK_SIZE", "250"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("MAX_UPLOAD_BYTES", "1048576"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite://history.db");
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.db_max_connections, 4);
        assert_eq!(config.max_upload_bytes, 1_048_576);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = config_from(&[("CHUNK_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("CHUNK_SIZE"));
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = config_from(&[("CHUNK_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("invalid value for CHUNK_SIZE"));

        assert!(config_from(&[("BIND_ADDR", "not-an-addr")]).is_err());
    }
}
