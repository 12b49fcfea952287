use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_MAX_DATASET_BYTES;
use crate::error::VetError;

pub const CONFIG_FILE: &str = "exovet.json";
pub const API_URL_ENV: &str = "EXOVET_API_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_dataset_bytes: Option<u64>,
    #[serde(default)]
    pub assistant: Option<AssistantConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub max_dataset_bytes: u64,
    pub assistant: ResolvedAssistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAssistant {
    pub endpoint: String,
    pub top_k: u32,
    pub timeout: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        // Infallible: an empty config resolves to the built-in defaults.
        ConfigLoader::resolve_config(Config::default(), None)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config from an explicit path, `./exovet.json`, or the user
    /// config directory, in that order. Missing implicit files are not an
    /// error; a missing explicit one is.
    ///
    /// The API URL comes from `api_url` if given, then `EXOVET_API_URL`, then
    /// the file.
    pub fn resolve(path: Option<&str>, api_url: Option<&str>) -> Result<ResolvedConfig, VetError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => match Self::default_locations().into_iter().find(|p| p.exists()) {
                Some(found) => Self::read(found)?,
                None => Config::default(),
            },
        };

        let env_url = std::env::var(API_URL_ENV).ok();
        let url_override = api_url.map(str::to_string).or(env_url);
        Ok(Self::resolve_config(config, url_override.as_deref()))
    }

    pub fn resolve_config(config: Config, url_override: Option<&str>) -> ResolvedConfig {
        let api_url = url_override
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or(config.api_url)
            .unwrap_or_else(|| "http://localhost:8000".to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let assistant = config.assistant.unwrap_or_default();
        let assistant_base = assistant
            .url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_url.clone());
        let assistant_path = assistant.path.unwrap_or_else(|| "/chat".to_string());
        let assistant_path = if assistant_path.starts_with('/') {
            assistant_path
        } else {
            format!("/{assistant_path}")
        };

        ResolvedConfig {
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(60)),
            max_dataset_bytes: config
                .max_dataset_bytes
                .unwrap_or(DEFAULT_MAX_DATASET_BYTES),
            assistant: ResolvedAssistant {
                endpoint: format!("{assistant_base}{assistant_path}"),
                top_k: assistant.top_k.unwrap_or(5),
                timeout: Duration::from_secs(assistant.timeout_secs.unwrap_or(30)),
            },
            api_url,
        }
    }

    fn read(path: PathBuf) -> Result<Config, VetError> {
        let content = fs::read_to_string(&path).map_err(|_| VetError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| VetError::ConfigParse(err.to_string()))
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("", "", "exovet") {
            locations.push(dirs.config_dir().join(CONFIG_FILE));
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default(), None);
        assert_eq!(resolved.api_url, "http://localhost:8000");
        assert_eq!(resolved.timeout, Duration::from_secs(60));
        assert_eq!(resolved.max_dataset_bytes, 50 * 1024 * 1024);
        assert_eq!(resolved.assistant.endpoint, "http://localhost:8000/chat");
        assert_eq!(resolved.assistant.top_k, 5);
    }

    #[test]
    fn env_url_wins_over_file() {
        let config = Config {
            api_url: Some("http://file.example".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config, Some("http://env.example/"));
        assert_eq!(resolved.api_url, "http://env.example");
    }
}
