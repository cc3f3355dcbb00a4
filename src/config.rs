//! Start-up configuration.
//!
//! Read once from `~/.config/dsu-bridge/config.toml`. A missing file is created with the
//! defaults; missing keys fall back to their defaults. Nothing is reloaded at runtime.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::controller::ControllerSettings;
use crate::protocol::{DEFAULT_CLIENT_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_SERVER_ID};
use crate::server::RegistrationPolicy;

const CONFIG_DIR: &str = ".config/dsu-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum tracing level: trace, debug, info, warn or error
    pub log_level: String,
    pub server: ServerSettings,
    pub controller: ControllerSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerSettings::default(),
            controller: ControllerSettings::default(),
        }
    }
}

/// Network identity of the DSU server.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: IpAddr,
    pub port: u16,
    pub server_id: u32,
    /// A subscriber that has not re-sent a pad data request for this long stops receiving reports
    pub client_timeout_ms: u64,
    pub registration_policy: RegistrationPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            server_id: DEFAULT_SERVER_ID,
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            registration_policy: RegistrationPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Writes the default configuration if `path` does not exist yet.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file {} present", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config file: {}", e))?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        if config.server.client_timeout_ms == 0 {
            warn!("client_timeout_ms is 0, reports will only follow a request in the same millisecond");
        }
        Ok(config)
    }

    /// Ensures a config file exists at `path`, then loads it.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        Self::ensure_default_config(path).await?;
        Self::load(path).await
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
