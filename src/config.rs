use std::fmt;
use std::path::PathBuf;

/// Server settings, read from `COVERS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "covers".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parsed = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError { var, value }),
            }
        };
        let port = |var: &'static str| -> Result<Option<u16>, ConfigError> {
            match parsed(var)? {
                None => Ok(None),
                Some(n) => u16::try_from(n).map(Some).map_err(|_| ConfigError {
                    var,
                    value: n.to_string(),
                }),
            }
        };

        let max_connections = match parsed("COVERS_MAX_CONNECTIONS")? {
            Some(0) => {
                return Err(ConfigError {
                    var: "COVERS_MAX_CONNECTIONS",
                    value: "0".into(),
                });
            }
            Some(n) => n as usize,
            None => defaults.max_connections,
        };

        Ok(Self {
            bind: lookup("COVERS_BIND").unwrap_or(defaults.bind),
            port: port("COVERS_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("COVERS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("COVERS_PASSWORD").unwrap_or(defaults.password),
            max_connections,
            compact_threshold: parsed("COVERS_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: port("COVERS_METRICS_PORT")?,
            tls_cert: lookup("COVERS_TLS_CERT"),
            tls_key: lookup("COVERS_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("COVERS_BIND", "127.0.0.1"),
            ("COVERS_PORT", "6543"),
            ("COVERS_DATA_DIR", "/var/lib/covers"),
            ("COVERS_MAX_CONNECTIONS", "8"),
            ("COVERS_COMPACT_THRESHOLD", "50"),
            ("COVERS_METRICS_PORT", "9000"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/covers"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9000));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = from_pairs(&[("COVERS_PORT", "seventy")]).unwrap_err();
        assert_eq!(err.var, "COVERS_PORT");
        assert!(from_pairs(&[("COVERS_METRICS_PORT", "70000")]).is_err());
        assert!(from_pairs(&[("COVERS_MAX_CONNECTIONS", "0")]).is_err());
    }
}
