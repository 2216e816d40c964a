use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::registry::DEFAULT_KEEP_ALIVE;

const DEFAULT_BIND: &str = "0.0.0.0:2052";
const DEFAULT_CERT_PATH: &str = "ssl/room/certificate.pem";
const DEFAULT_KEY_PATH: &str = "ssl/room/private.key";
const DEFAULT_STATIC_DIR: &str = "public";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub keep_alive: Duration,
    pub static_dir: PathBuf,
    /// user id -> display name. Empty means any id is accepted.
    pub users: HashMap<String, String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("CAMPUS_CHAT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "CAMPUS_CHAT_BIND",
            value: bind_raw.clone(),
        })?;

        let keep_alive = match lookup("CAMPUS_CHAT_KEEPALIVE_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "CAMPUS_CHAT_KEEPALIVE_SECS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_KEEP_ALIVE,
        };

        let users = match lookup("CAMPUS_CHAT_USERS") {
            Some(raw) => parse_users(&raw)?,
            None => HashMap::new(),
        };

        Ok(Config {
            bind,
            cert_path: lookup("CAMPUS_CHAT_TLS_CERT")
                .map_or_else(|| PathBuf::from(DEFAULT_CERT_PATH), PathBuf::from),
            key_path: lookup("CAMPUS_CHAT_TLS_KEY")
                .map_or_else(|| PathBuf::from(DEFAULT_KEY_PATH), PathBuf::from),
            keep_alive,
            static_dir: lookup("CAMPUS_CHAT_STATIC_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR), PathBuf::from),
            users,
        })
    }

    pub fn tls_available(&self) -> bool {
        self.cert_path.is_file() && self.key_path.is_file()
    }
}

// "u1:Ada Lovelace,u2:Grace Hopper"
fn parse_users(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut users = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((id, name)) = entry.split_once(':') else {
            return Err(ConfigError::Invalid {
                key: "CAMPUS_CHAT_USERS",
                value: entry.to_string(),
            });
        };
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() {
            return Err(ConfigError::Invalid {
                key: "CAMPUS_CHAT_USERS",
                value: entry.to_string(),
            });
        }
        let name = if name.is_empty() { id } else { name };
        users.insert(id.to_string(), name.to_string());
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind, "0.0.0.0:2052".parse::<SocketAddr>().unwrap());
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.cert_path, PathBuf::from("ssl/room/certificate.pem"));
        assert!(config.users.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("CAMPUS_CHAT_BIND", "127.0.0.1:8080"),
            ("CAMPUS_CHAT_KEEPALIVE_SECS", "5"),
            ("CAMPUS_CHAT_USERS", "u1:Ada Lovelace, u2:Grace Hopper,u3:"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.keep_alive, Duration::from_secs(5));
        assert_eq!(config.users["u1"], "Ada Lovelace");
        assert_eq!(config.users["u2"], "Grace Hopper");
        assert_eq!(config.users["u3"], "u3");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("CAMPUS_CHAT_BIND", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("CAMPUS_CHAT_KEEPALIVE_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("CAMPUS_CHAT_USERS", "no-colon")])).is_err());
    }
}
