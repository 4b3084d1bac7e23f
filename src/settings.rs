use serde::{Deserialize, Serialize};

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use backtrace::Backtrace;
use log::{debug, error, warn};

pub const DEFAULT_CONFIG_PATH: &str = "./pomi.yaml";

// Main configuration struct
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub imap: ImapConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub mailbox: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        ImapConfig {
            server: "imap.gmail.com".to_string(),
            port: 993,
            user: String::new(),
            password: None,
            mailbox: "Notes/pomera_sync".to_string(),
        }
    }
}

// OAuth2 client and a previously issued refresh token
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub dir: PathBuf,
    pub concurrency: usize,
    pub default_domain: String,
    pub extension: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            dir: PathBuf::from("./pomera_sync"),
            concurrency: 4,
            default_domain: "gmail.com".to_string(),
            extension: "txt".to_string(),
        }
    }
}

impl Config {
    /// Address used in the From header. Users without a domain get the default one.
    pub fn from_address(&self) -> String {
        if self.imap.user.contains('@') {
            self.imap.user.clone()
        } else {
            format!("{}@{}", self.imap.user, self.sync.default_domain)
        }
    }

    fn apply_env(&mut self) {
        if self.imap.user.is_empty() {
            if let Ok(user) = std::env::var("IMAP_USER") {
                self.imap.user = user;
            }
        }
        if self.imap.password.is_none() {
            self.imap.password = std::env::var("IMAP_PASS").ok().filter(|p| !p.is_empty());
        }
    }
}

fn log_failure(err: &anyhow::Error) {
    error!("Error: {:#}", err);

    // Capture and print the backtrace
    let backtrace = Backtrace::new();
    debug!("Backtrace:\n{:?}", backtrace);
}

pub fn save_settings(config: &Config, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("cannot serialize settings")?;
    fs::write(path, yaml).with_context(|| format!("cannot write {}", path.display()))
}

fn read_settings(path: &Path) -> Result<Config> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    serde_yaml::from_reader(reader).with_context(|| format!("cannot deserialize {}", path.display()))
}

pub fn load_settings(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        read_settings(path).inspect_err(log_failure)?
    } else {
        warn!("missing {}, creating it with minimal contents", path.display());
        let config = Config::default();
        save_settings(&config, path).inspect_err(log_failure)?;
        config
    };

    config.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("imap:\n  user: pomera\n").unwrap();
        assert_eq!(config.imap.user, "pomera");
        assert_eq!(config.imap.server, "imap.gmail.com");
        assert_eq!(config.imap.mailbox, "Notes/pomera_sync");
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.extension, "txt");
    }

    #[test]
    fn test_from_address_appends_domain() {
        let mut config = Config::default();
        config.imap.user = "pomera".to_string();
        assert_eq!(config.from_address(), "pomera@gmail.com");

        config.imap.user = "pomera@example.org".to_string();
        assert_eq!(config.from_address(), "pomera@example.org");
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomi.yaml");

        let config = load_settings(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.dir, PathBuf::from("./pomera_sync"));

        let reloaded = read_settings(&path).unwrap();
        assert_eq!(reloaded.imap.port, 993);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomi.yaml");
        fs::write(&path, "imap: [not, a, map").unwrap();
        assert!(load_settings(&path).is_err());
    }
}
