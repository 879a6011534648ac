use clinicbooks_core::Clinic;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "CLINICBOOKS_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "clinicbooks.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var}={value} is not valid: {reason}")]
    Override {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClinicSeed {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub max_connections: u32,
    /// Milliseconds a write waits on another writer's lock.
    pub busy_timeout_ms: u64,
    pub progress_buffer: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_upload_bytes: usize,
    pub clinics: Vec<ClinicSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: "127.0.0.1:8080".to_string(),
            max_connections: 4,
            busy_timeout_ms: 5000,
            progress_buffer: 256,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            max_upload_bytes: 25 * 1024 * 1024,
            clinics: Vec::new(),
        }
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("org", "clinicbooks", "Clinicbooks")
        .map(|dirs| dirs.data_dir().join("clinicbooks.db"))
        .unwrap_or_else(|| PathBuf::from("clinicbooks.db"))
}

impl Config {
    /// Reads `$CLINICBOOKS_CONFIG` (must exist when set) or `./clinicbooks.toml`
    /// (optional), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = lookup("CLINICBOOKS_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("CLINICBOOKS_BIND") {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::Override {
                    var: "CLINICBOOKS_BIND",
                    value: addr,
                    reason: "expected host:port".to_string(),
                });
            }
            self.bind_addr = addr;
        }
        if let Some(level) = lookup("CLINICBOOKS_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn seed_clinics(&self) -> Vec<Clinic> {
        self.clinics
            .iter()
            .map(|c| Clinic::new(c.id, &c.name, &c.location))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.clinics.is_empty());
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml(
            r#"
            database_path = "/var/lib/clinicbooks/books.db"
            bind_addr = "0.0.0.0:9000"
            max_connections = 8
            busy_timeout_ms = 250
            progress_buffer = 32
            log_level = "debug"
            log_format = "json"
            max_upload_bytes = 1048576

            [[clinics]]
            id = 1
            name = "Northside"
            location = "Austin"

            [[clinics]]
            id = 2
            name = "Lakeview"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/clinicbooks/books.db"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.progress_buffer, 32);
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        let clinics = config.seed_clinics();
        assert_eq!(clinics.len(), 2);
        assert_eq!(clinics[1].location, "");
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Config::from_toml(r#"log_format = "xml""#).is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("CLINICBOOKS_DATABASE", "/tmp/other.db"),
            ("CLINICBOOKS_BIND", "127.0.0.1:9999"),
            ("CLINICBOOKS_LOG", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn bad_bind_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|var| (var == "CLINICBOOKS_BIND").then(|| "nowhere".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Override { var: "CLINICBOOKS_BIND", .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
