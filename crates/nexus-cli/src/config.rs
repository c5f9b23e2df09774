//! CLI configuration

use std::path::{Path, PathBuf};

use nexus_core::{ConfigError, SigningSecret, TokenConfig};
use nexus_mobile::MobileConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Everything `nexus-auth` reads at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default = "default_token")]
    pub token: TokenConfig,

    #[serde(default)]
    pub mobile: MobileConfig,

    /// JSON credential table
    #[serde(default)]
    pub credential_store_path: Option<PathBuf>,

    /// JSON array of principals (the identity directory)
    #[serde(default)]
    pub directory_path: Option<PathBuf>,

    /// JSON map of principal id to TOTP parameters
    #[serde(default)]
    pub totp_secrets_path: Option<PathBuf>,

    /// Wrong-code ledger shared by every `nexus-auth` process
    #[serde(default)]
    pub totp_attempts_path: Option<PathBuf>,
}

fn default_token() -> TokenConfig {
    TokenConfig::new("http://localhost", SigningSecret::default())
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            mobile: MobileConfig::default(),
            credential_store_path: None,
            directory_path: None,
            totp_secrets_path: None,
            totp_attempts_path: None,
        }
    }
}

impl NexusConfig {
    /// Platform data directory for `nexus-auth`
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nexus-auth")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the configuration for a run
    ///
    /// An explicit path must exist. Otherwise `config.json` in the data
    /// directory is used when present, and defaults when not. The signing
    /// secret may always be supplied through `NEXUS_JWT_SECRET`.
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if path.exists() {
                    Self::load(&path)?
                } else {
                    debug!(data_dir = %data_dir.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.token.apply_env();
        config.mobile.validate()?;
        Ok(config)
    }

    pub fn credential_store_path(&self, data_dir: &Path) -> PathBuf {
        self.credential_store_path
            .clone()
            .unwrap_or_else(|| data_dir.join("credentials.json"))
    }

    pub fn directory_path(&self, data_dir: &Path) -> PathBuf {
        self.directory_path
            .clone()
            .unwrap_or_else(|| data_dir.join("principals.json"))
    }

    pub fn totp_attempts_path(&self, data_dir: &Path) -> PathBuf {
        self.totp_attempts_path
            .clone()
            .unwrap_or_else(|| data_dir.join("totp_attempts.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_have_no_secret() {
        let config = NexusConfig::default();
        assert!(config.token.secret.is_empty());
        assert!(matches!(
            config.token.validate(),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_paths_default_into_data_dir() {
        let config = NexusConfig::default();
        let dir = Path::new("/srv/nexus");
        assert_eq!(
            config.credential_store_path(dir),
            PathBuf::from("/srv/nexus/credentials.json")
        );
        assert_eq!(
            config.directory_path(dir),
            PathBuf::from("/srv/nexus/principals.json")
        );
        assert_eq!(
            config.totp_attempts_path(dir),
            PathBuf::from("/srv/nexus/totp_attempts.json")
        );
    }

    #[test]
    fn test_load_from_data_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{
                "token": {"issuer": "https://time.example.com", "secret": "s3cret"},
                "mobile": {"lockout": {"threshold": 3, "lockout_secs": 600}},
                "totp_secrets_path": "/etc/nexus/totp.json"
            }"#,
        )
        .unwrap();

        let config = NexusConfig::resolve(None, dir.path()).unwrap();
        assert_eq!(config.token.issuer, "https://time.example.com");
        assert_eq!(config.mobile.lockout.threshold, 3);
        assert_eq!(
            config.totp_secrets_path,
            Some(PathBuf::from("/etc/nexus/totp.json"))
        );
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            NexusConfig::resolve(Some(&missing), dir.path()),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_mobile_config_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"mobile": {"lockout": {"threshold": 0, "lockout_secs": 600}}}"#,
        )
        .unwrap();
        assert!(matches!(
            NexusConfig::resolve(None, dir.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
