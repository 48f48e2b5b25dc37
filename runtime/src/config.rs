//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bili_engagement::{DelayRange, HarvestConfig};

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "BILI_HARVEST_CONFIG";

/// Top-level config file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub harvest: HarvestConfig,
    pub http: HttpSettings,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Upper bound on every request, connect to last byte.
    pub timeout_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_ms: 15_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enabled: bool,
    pub chromium_path: Option<PathBuf>,
    pub navigation_timeout_ms: u64,
    /// Wait after navigation and again after scrolling, for lazy content.
    pub settle_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chromium_path: None,
            navigation_timeout_ms: 30_000,
            settle_ms: 3_000,
        }
    }
}

/// Resolve the config file path: explicit, then `BILI_HARVEST_CONFIG`, then
/// `./bili-harvest.toml`, then `~/.bili-harvest/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from("bili-harvest.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    let home_config = dirs::home_dir()?.join(".bili-harvest").join("config.toml");
    home_config.exists().then_some(home_config)
}

/// Load the resolved config file, or defaults when there is none.
pub fn load(explicit: Option<&Path>) -> Result<RuntimeConfig> {
    match resolve_config_path(explicit) {
        Some(path) => {
            debug!("loading config from {}", path.display());
            load_config(&path)
        }
        None => {
            debug!("no config file found, using defaults");
            Ok(RuntimeConfig::default())
        }
    }
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: RuntimeConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &RuntimeConfig) -> Result<()> {
    let harvest = &config.harvest;

    if harvest.comment_page_size == 0 {
        anyhow::bail!("harvest.comment_page_size must be > 0");
    }
    if config.http.timeout_ms == 0 {
        anyhow::bail!("http.timeout_ms must be > 0");
    }
    if config.browser.navigation_timeout_ms == 0 {
        anyhow::bail!("browser.navigation_timeout_ms must be > 0");
    }

    let ranges: [(&str, DelayRange); 6] = [
        ("page_delay", harvest.page_delay),
        ("backoff", harvest.backoff),
        ("rate_limit_backoff", harvest.rate_limit_backoff),
        ("breather", harvest.breather),
        ("single_shot_delay", harvest.single_shot_delay),
        ("item_delay", harvest.item_delay),
    ];
    for (name, range) in ranges {
        if range.min_ms > range.max_ms {
            anyhow::bail!(
                "harvest.{name}: min_ms ({}) must not exceed max_ms ({})",
                range.min_ms,
                range.max_ms
            );
        }
    }
    if harvest.rate_limit_backoff.min_ms < harvest.backoff.min_ms {
        anyhow::bail!("harvest.rate_limit_backoff must not be shorter than harvest.backoff");
    }

    Ok(())
}
