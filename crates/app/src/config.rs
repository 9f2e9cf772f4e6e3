use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kitty_import::{ParserConfig, StatementProfile};
use kitty_match::MatcherConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "kitty.toml";
pub const DATABASE_FILE: &str = "kitty.db";

/// Contents of `kitty.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub database: DatabaseConfig,
    pub parser: ParserConfig,
    pub matcher: MatcherConfig,
    pub remote_matcher: RemoteMatcherConfig,
    pub statement_csv: StatementProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteMatcherConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteMatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 10,
        }
    }
}

impl RemoteMatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl AppConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_content).context("Failed to parse configuration")?;
        config.parser.validate().context("Invalid [parser] section")?;
        config.matcher.validate().context("Invalid [matcher] section")?;
        Ok(config)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("In {}", path.display()))
    }

    /// Command-line/env override first, then `[database] path`, then the data dir.
    pub fn database_path(&self, cli_override: Option<&Path>, data_dir: &Path) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.database.path.clone())
            .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "kitty", "Kitty")
        .context("Failed to resolve the application data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
