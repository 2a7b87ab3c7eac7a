use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (id, listener) in &self.listener {
            if id.is_empty() {
                anyhow::bail!("listener id must not be empty");
            }
            if listener.host.is_empty() {
                anyhow::bail!("listener '{id}': host must not be empty");
            }
            if listener.port == 0 {
                anyhow::bail!("listener '{id}': port must not be zero");
            }
            if listener.bind_timeout.is_zero() {
                anyhow::bail!("listener '{id}': bind_timeout must be positive");
            }
        }

        for (id, connection) in &self.connection {
            if id.is_empty() {
                anyhow::bail!("connection id must not be empty");
            }
            if connection.host.is_empty() {
                anyhow::bail!("connection '{id}': host must not be empty");
            }
            if connection.port == 0 {
                anyhow::bail!("connection '{id}': port must not be zero");
            }
            if let Some(restart) = connection.restart {
                if restart.is_zero() {
                    anyhow::bail!("connection '{id}': restart must be positive when set");
                }
            }
        }

        info!("configuration validated successfully");
        Ok(())
    }
}
