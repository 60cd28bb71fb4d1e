use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_PATH: &str = "data/store.json";
const DEFAULT_ADMIN_EMAIL: &str = "admin@taskboard.local";
const DEFAULT_TICK_MS: u64 = 1000;
const MIN_TICK_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Deployment-time settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_path: PathBuf,
    pub admin_email: String,
    pub tick: Duration,
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            read_only: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup("PORT") {
            config.port = value.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup("APP_DATA_PATH") {
            config.data_path = PathBuf::from(value);
        }

        if let Some(value) = lookup("TASKBOARD_ADMIN_EMAIL") {
            let value = value.trim().to_lowercase();
            if !value.contains('@') {
                return Err(ConfigError::Invalid {
                    name: "TASKBOARD_ADMIN_EMAIL",
                    value,
                });
            }
            config.admin_email = value;
        }

        if let Some(value) = lookup("TASKBOARD_TICK_MS") {
            let millis = value
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms >= MIN_TICK_MS)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "TASKBOARD_TICK_MS",
                    value: value.clone(),
                })?;
            config.tick = Duration::from_millis(millis);
        }

        if let Some(value) = lookup("TASKBOARD_READ_ONLY") {
            config.read_only = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "TASKBOARD_READ_ONLY",
                        value,
                    })
                }
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("APP_DATA_PATH", "/tmp/x.json"),
            ("TASKBOARD_ADMIN_EMAIL", " Boss@Example.com "),
            ("TASKBOARD_TICK_MS", "250"),
            ("TASKBOARD_READ_ONLY", "true"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_path, PathBuf::from("/tmp/x.json"));
        assert_eq!(config.admin_email, "boss@example.com");
        assert_eq!(config.tick, Duration::from_millis(250));
        assert!(config.read_only);
    }

    #[test]
    fn rejects_too_fast_tick() {
        let err = Config::from_lookup(lookup(&[("TASKBOARD_TICK_MS", "5")])).unwrap_err();
        assert!(err.to_string().contains("TASKBOARD_TICK_MS"));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Config::from_lookup(lookup(&[("PORT", "http")])).is_err());
    }
}
