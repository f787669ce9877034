//! Configuration loader with multi-source merging.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::WarrenConfig;

/// Builder over the merge order: defaults → TOML file → `WARREN_*` env.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: "WARREN".to_string(),
        }
    }

    /// Reads this file instead of the default `warren.toml` lookup.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and validates the merged configuration.
    pub fn load(self) -> Result<WarrenConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults.
        let defaults = WarrenConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. TOML file: explicit path, or ./warren.toml when present.
        match &self.file {
            Some(path) => {
                builder = builder.add_source(
                    config::File::from(path.clone()).format(config::FileFormat::Toml),
                );
            }
            None => {
                builder = builder.add_source(
                    config::File::with_name("warren")
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Environment (WARREN_*).
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build().context("failed to build configuration")?;
        let config: WarrenConfig = merged
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
