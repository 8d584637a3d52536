//! Configuration system (layered: defaults < TOML file < env < code).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DasiError, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOOL_TURNS: usize = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Resolved configuration for the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DasiConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f64,
    pub history_limit: usize,
    pub approval_timeout_secs: u64,
    pub max_tool_turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    pub tools: ToolsConfig,
}

/// Which tools are offered to the model and how they behave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: Vec<String>,
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Regex patterns; a command matching any of them is refused.
    pub deny_patterns: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DasiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            history_limit: DEFAULT_HISTORY_LIMIT,
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            history_dir: None,
            custom_instructions: None,
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                "web_search".to_string(),
                "system_info".to_string(),
                "terminal_command".to_string(),
            ],
            terminal: TerminalConfig::default(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            deny_patterns: vec![
                r"\brm\s+-[a-zA-Z]*r[a-zA-Z]*f?\s+/(\s|$)".to_string(),
                r"\bmkfs(\.\w+)?\b".to_string(),
                r"\bdd\s+if=".to_string(),
                r":\(\)\s*\{\s*:\|:&\s*\};:".to_string(),
                r"\b(shutdown|reboot|halt|poweroff)\b".to_string(),
                r">\s*/dev/sd[a-z]".to_string(),
            ],
            timeout_secs: 30,
        }
    }
}

impl DasiConfig {
    /// Load defaults, then the TOML file, then the environment.
    ///
    /// An explicit `path` must exist; the default `~/.dasi/config.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_dasi_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DasiError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            DasiError::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overlay environment variables using the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key).filter(|v| !v.is_empty()));

        if let Some(model) = first(&["DASI_MODEL"]) {
            self.model = model;
        }
        if let Some(key) = first(&["DASI_API_KEY", "OPENAI_API_KEY"]) {
            self.api_key = Some(key);
        }
        if let Some(url) = first(&["DASI_BASE_URL", "OPENAI_BASE_URL"]) {
            self.base_url = Some(url);
        }
        if let Some(dir) = first(&["DASI_HISTORY_DIR"]) {
            self.history_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = first(&["DASI_APPROVAL_TIMEOUT_SECS"]) {
            match raw.parse() {
                Ok(secs) => self.approval_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid DASI_APPROVAL_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = first(&["DASI_MAX_TOOL_TURNS"]) {
            match raw.parse() {
                Ok(turns) => self.max_tool_turns = turns,
                Err(_) => warn!(value = %raw, "ignoring invalid DASI_MAX_TOOL_TURNS"),
            }
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Directory holding per-session history logs.
    pub fn history_dir(&self) -> PathBuf {
        self.history_dir
            .clone()
            .unwrap_or_else(|| default_dasi_dir().join("history"))
    }

    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tools.enabled.iter().any(|t| t == name)
    }
}

pub fn default_dasi_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".dasi"))
        .unwrap_or_else(|| PathBuf::from(".dasi"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = DasiConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.approval_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_tool_turns, 5);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.tools.terminal.timeout_secs, 30);
        assert!(config.tool_enabled("system_info"));
    }

    #[test]
    fn dasi_env_vars_win_over_openai_ones() {
        let mut config = DasiConfig::default();
        config.apply_env(env(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("DASI_API_KEY", "sk-dasi"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("sk-dasi"));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn invalid_numeric_env_is_ignored() {
        let mut config = DasiConfig::default();
        config.apply_env(env(&[
            ("DASI_APPROVAL_TIMEOUT_SECS", "soon"),
            ("DASI_MAX_TOOL_TURNS", "3"),
        ]));
        assert_eq!(config.approval_timeout_secs, 120);
        assert_eq!(config.max_tool_turns, 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "model = \"gpt-4o\"\n[tools]\nenabled = [\"system_info\"]\n",
        )
        .unwrap();

        let config = DasiConfig::from_file(&path).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.tools.enabled, vec!["system_info".to_string()]);
        assert_eq!(config.tools.terminal.timeout_secs, 30);
        assert_eq!(config.temperature, 0.7);
    }

    #[test]
    fn missing_explicit_file_is_a_configuration_error() {
        let err = DasiConfig::from_file(Path::new("/nonexistent/dasi.toml")).unwrap_err();
        assert!(matches!(err, DasiError::Configuration(_)));
    }
}
