use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://aihorde.net/api/v2";
pub const DEFAULT_CLIENT_AGENT: &str = "horde:0.1:https://github.com/spinagon";

/// how a model is picked when several candidates remain and nothing ties
/// the request to a previously used one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// index derived from the wall clock, different on each call.
    #[default]
    Random,
    /// always the first candidate in registry order.
    First,
}

/// root configuration for the horde client and binary.
///
/// every field has a default so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HordeConfig {
    /// base url of the service api, without a trailing slash.
    pub base_url: String,
    /// value of the `Client-Agent` header.
    pub client_agent: String,
    /// api key; the host falls back to the anonymous key when absent.
    pub api_key: Option<String>,
    /// seconds between two status checks.
    pub poll_interval_secs: u64,
    /// wall-clock budget for a single job, in seconds.
    pub max_wait_secs: u64,
    pub max_context_length: u32,
    pub max_length: u32,
    /// rough character/token ratio used to size the prompt budget.
    pub chars_per_token: u32,
    pub selection: SelectionPolicy,
    /// optional json template catalog replacing the built-in one.
    pub templates: Option<PathBuf>,
}

impl Default for HordeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_agent: DEFAULT_CLIENT_AGENT.to_string(),
            api_key: None,
            poll_interval_secs: 5,
            max_wait_secs: 20 * 60,
            max_context_length: 1024,
            max_length: 120,
            chars_per_token: 4,
            selection: SelectionPolicy::default(),
            templates: None,
        }
    }
}

impl HordeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// parse a configuration from toml text.
pub fn from_toml_str(data: &str) -> Result<HordeConfig> {
    toml::from_str(data).context("failed to parse horde config")
}

/// load configuration from a toml file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HordeConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    from_toml_str(&data).with_context(|| format!("invalid config file at {}", path.display()))
}

/// load configuration from `path` when given, defaults otherwise.
pub fn load_or_default(path: Option<&Path>) -> Result<HordeConfig> {
    match path {
        Some(p) => load_from_file(p),
        None => Ok(HordeConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = from_toml_str("").unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.max_wait(), Duration::from_secs(1200));
        assert_eq!(cfg.selection, SelectionPolicy::Random);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn fields_override_defaults() {
        let cfg = from_toml_str(
            r#"
            base_url = "http://localhost:7001/api/v2"
            api_key = "abc"
            poll_interval_secs = 2
            selection = "first"
            templates = "/etc/horde/templates.json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://localhost:7001/api/v2");
        assert_eq!(cfg.api_key.as_deref(), Some("abc"));
        assert_eq!(cfg.poll_interval_secs, 2);
        assert_eq!(cfg.selection, SelectionPolicy::First);
        assert_eq!(cfg.templates, Some(PathBuf::from("/etc/horde/templates.json")));
        assert_eq!(cfg.max_length, 120);
    }

    #[test]
    fn unknown_selection_is_rejected() {
        assert!(from_toml_str(r#"selection = "fair""#).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_from_file("/definitely/not/here/horde.toml").is_err());
        assert!(load_or_default(None).is_ok());
    }
}
