use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::{
    auth::ClientCredentials,
    client::{ClientConfig, DEFAULT_BASE_URL},
};

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// client_id = "..."
/// client_secret = "..."
/// refresh_token = "..."
/// default_device = "70:ee:50:00:00:01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Refresh token supplied by the user; seeded into the client on start.
    /// Never written back when the server rotates it.
    pub refresh_token: Option<String>,

    /// Station used when a command does not name one.
    pub default_device: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            default_device: None,
            base_url: default_base_url(),
        }
    }
}

impl Config {
    /// Application credentials, or an error with a hint when unset.
    pub fn credentials(&self) -> Result<ClientCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(ClientCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(anyhow!(
                "No client credentials configured.\n\
                 Hint: run `netatmo configure` and enter your app's client id and secret."
            )),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default().with_base_url(self.base_url.clone())
    }

    pub fn set_credentials(&mut self, client_id: String, client_secret: String) {
        self.client_id = Some(client_id);
        self.client_secret = Some(client_secret);
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "netatmo", "netatmo-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
