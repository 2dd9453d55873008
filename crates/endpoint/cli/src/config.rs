use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub size: u32,
    pub render: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: 4,
            render: true,
        }
    }
}

impl Config {
    /// Loads the driver configuration, writing the defaults on first run.
    pub fn load() -> anyhow::Result<(PathBuf, Self)> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("no config directory on this platform"))?;
        let path = base.join(env!("CARGO_PKG_NAME")).join("config.toml");

        if path.is_file() {
            let config = toml::from_str(&fs::read_to_string(&path)?)?;

            return Ok((path, config));
        }

        if path.exists() {
            anyhow::bail!("`{}` exists but is not a file", path.display());
        }

        let defaults = Self::default();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(&path, toml::to_string(&defaults)?)?;

        Ok((path, defaults))
    }
}
