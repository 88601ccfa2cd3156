use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CorpusError, Result};

#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub github: GithubConfig,
    pub scan: ScanConfig,
    pub clone: CloneConfig,
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPolicy {
    /// Wait out the limit and move on; the throttled repository is lost.
    #[default]
    Drop,
    /// Wait out the limit and retry the throttled repository.
    Requeue,
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct GithubConfig {
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub api_base: String,
    pub requests_per_hour: u32,
    pub rate_limit_wait_secs: u64,
    pub on_rate_limit: RateLimitPolicy,
    pub max_requeues: u32,
    pub batch: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_file: None,
            api_base: "https://api.github.com".to_string(),
            requests_per_hour: 5000,
            rate_limit_wait_secs: 3660,
            on_rate_limit: RateLimitPolicy::Drop,
            max_requeues: 1,
            batch: 100,
        }
    }
}

impl GithubConfig {
    /// Inline token wins over the token file.
    pub fn resolve_token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        match &self.token_file {
            Some(path) => read_token_file(path).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct ScanConfig {
    pub show_progress: bool,
    pub target_language: String,
    pub recurse_subdirectories: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            show_progress: false,
            target_language: "Java".to_string(),
            recurse_subdirectories: true,
        }
    }
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Default)]
#[serde(default)]
pub struct CloneConfig {
    pub show_progress: bool,
    pub limit: Option<usize>,
}

impl Config {
    /// Reads the TOML config; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&contents)?)
    }
}

/// A `--flag`/`--no-flag` pair from the command line wins over the
/// configured value; with neither given the config decides.
pub fn flag_override(enable: bool, disable: bool, configured: bool) -> bool {
    if disable {
        false
    } else if enable {
        true
    } else {
        configured
    }
}

/// Reads `GITHUB_TOKEN` out of a JSON env file.
pub fn read_token_file(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)?;
    let value = serde_json::from_str::<Value>(&contents)?;
    value
        .get("GITHUB_TOKEN")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CorpusError::MissingToken(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let config = toml::from_str::<Config>(
            r#"
[github]
token_file = "config/env.json"
on_rate_limit = "requeue"
batch = 50

[scan]
target_language = "Python"
recurse_subdirectories = false
"#,
        )
        .unwrap();
        assert_eq!(config.github.token_file, Some(PathBuf::from("config/env.json")));
        assert_eq!(config.github.on_rate_limit, RateLimitPolicy::Requeue);
        assert_eq!(config.github.batch, 50);
        assert_eq!(config.github.rate_limit_wait_secs, 3660);
        assert_eq!(config.scan.target_language, "Python");
        assert!(!config.scan.recurse_subdirectories);
        assert!(!config.scan.show_progress);
        assert_eq!(config.clone, CloneConfig::default());
    }

    #[test]
    fn command_line_flags_override_config() {
        assert!(!flag_override(false, true, true));
        assert!(flag_override(true, false, false));
        assert!(flag_override(false, false, true));
        assert!(!flag_override(false, false, false));
    }

    #[test]
    fn missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("corpus.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_token_from_env_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");
        fs::write(&path, r#"{"GITHUB_TOKEN": "ghp_abc"}"#).unwrap();
        let github = GithubConfig {
            token_file: Some(path),
            ..GithubConfig::default()
        };
        assert_eq!(github.resolve_token().unwrap(), Some("ghp_abc".to_string()));
    }

    #[test]
    fn token_file_without_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");
        fs::write(&path, r#"{"OTHER": 1}"#).unwrap();
        assert!(matches!(
            read_token_file(&path),
            Err(CorpusError::MissingToken(_))
        ));
    }

    #[test]
    fn inline_token_wins() {
        let github = GithubConfig {
            token: Some("inline".to_string()),
            token_file: Some(PathBuf::from("/does/not/exist.json")),
            ..GithubConfig::default()
        };
        assert_eq!(github.resolve_token().unwrap(), Some("inline".to_string()));
    }
}
