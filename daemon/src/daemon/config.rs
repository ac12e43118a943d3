// Daemon configuration
// Loaded from an optional JSON file: {"port": 8083, "cert_file": "...", "key_file": "..."}

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default listening port shared by the daemon and the trigger CLI
pub const DEFAULT_PORT: u16 = 8083;

/// Environment variable pointing at a JSON config file
pub const CONFIG_ENV: &str = "ZELLAND_CONFIG";

/// Configuration for the daemon listener and logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port for HTTP, WebSocket and trigger endpoints
    pub port: u16,
    /// Address to bind; devices connect from the network so this defaults to all interfaces
    pub bind: IpAddr,
    /// PEM certificate chain. TLS is enabled only when both cert and key are set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    /// PEM private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            cert_file: None,
            key_file: None,
            log_level: "info".to_string(),
        }
    }
}

/// Certificate and key paths for a TLS listener
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        config.tls()?;
        Ok(config)
    }

    /// Load from `$ZELLAND_CONFIG` when set, otherwise use defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Apply a command-line port override (0 means "not given")
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port.filter(|p| *p != 0) {
            self.port = port;
        }
        self
    }

    /// Socket address the daemon listens on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// TLS material, if configured. A cert without a key (or vice versa) is an error.
    pub fn tls(&self) -> Result<Option<TlsPaths>> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => Ok(Some(TlsPaths {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::Config(
                "cert_file is set but key_file is missing".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "key_file is set but cert_file is missing".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8083);
        assert!(config.tls().unwrap().is_none());
        assert_eq!(config.listen_addr().port(), 8083);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zelland.json");
        std::fs::write(&path, r#"{"port": 9000}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "info");
        assert!(config.cert_file.is_none());
    }

    #[test]
    fn test_load_with_tls() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zelland.json");
        std::fs::write(
            &path,
            r#"{"port": 8443, "cert_file": "/etc/zelland/cert.pem", "key_file": "/etc/zelland/key.pem"}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let tls = config.tls().unwrap().expect("tls configured");
        assert_eq!(tls.cert_file, PathBuf::from("/etc/zelland/cert.pem"));
        assert_eq!(tls.key_file, PathBuf::from("/etc/zelland/key.pem"));
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zelland.json");
        std::fs::write(&path, r#"{"cert_file": "/tmp/cert.pem"}"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zelland.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/zelland.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_port_override() {
        let config = Config::default().with_port_override(Some(9999));
        assert_eq!(config.port, 9999);

        let config = Config::default().with_port_override(Some(0));
        assert_eq!(config.port, DEFAULT_PORT);

        let config = Config::default().with_port_override(None);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
