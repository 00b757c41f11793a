//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use roleplay_audio::{CaptureConfig, PlaybackConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::scenario::{self, Scenario, DEFAULT_VOICE};

/// Environment variables consulted for the API key, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Live client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// API key stored in the file. Prefer the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Key taken from the environment; never written back
    #[serde(skip)]
    pub env_api_key: Option<String>,

    /// Websocket endpoint of the live conversation service
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Voice used when a session doesn't name one
    pub default_voice: String,

    /// Seconds to wait for the service to acknowledge a new session
    pub setup_timeout_secs: u64,

    pub capture: CaptureConfig,

    pub playback: PlaybackConfig,

    pub scenarios: Vec<Scenario>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            api_key: None,
            env_api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            default_voice: DEFAULT_VOICE.to_string(),
            setup_timeout_secs: 10,
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            scenarios: scenario::default_scenarios(),
        }
    }
}

impl LiveConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    /// Load configuration from `path`, or create a default file there.
    /// The API key environment variables are applied afterwards.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref().to_path_buf();

        let mut config = if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;

            let mut config: LiveConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;

            config.config_path = config_path;
            config
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            config
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Take the API key from the first non-empty variable in
    /// [`API_KEY_ENV_VARS`]
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.env_api_key = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
    }

    /// Effective API key, environment first
    pub fn api_key(&self) -> Option<&str> {
        self.env_api_key
            .as_deref()
            .or(self.api_key.as_deref())
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Endpoint URL with the API key attached
    pub fn session_url(&self) -> String {
        let key = self.api_key().unwrap_or_default();
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, key)
    }

    /// Endpoint host for messages (never includes the key)
    pub fn endpoint_host(&self) -> String {
        Url::parse(&self.endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.endpoint.clone())
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs.max(1))
    }

    pub fn find_scenario(&self, id: &str) -> Option<&Scenario> {
        scenario::find(&self.scenarios, id)
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roleplay")
            .join("config.toml")
    }
}

/// `wss://` anywhere, or plain `ws://` to this machine
pub fn is_secure_endpoint(endpoint: &str) -> bool {
    let Ok(url) = Url::parse(endpoint) else {
        return false;
    };

    match url.scheme() {
        "wss" => true,
        "ws" => match url.host() {
            Some(url::Host::Domain(domain)) => domain == "localhost",
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = LiveConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.default_voice, "Kore");
        assert_eq!(config.setup_timeout_secs, 10);
        assert!(config.find_scenario("sales-1").is_some());
    }

    #[test]
    fn test_round_trip_preserves_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = LiveConfig::load_from(&path).unwrap();
        config.default_voice = "Puck".to_string();
        config.capture.device_index = Some(2);
        config.playback.volume = 0.5;
        config.save().unwrap();

        let reloaded = LiveConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.default_voice, "Puck");
        assert_eq!(reloaded.capture.device_index, Some(2));
        assert_eq!(reloaded.playback.volume, 0.5);
        assert_eq!(reloaded.scenarios, config.scenarios);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"custom-model\"\n[capture]\nblock_size = 2048\n").unwrap();

        let config = LiveConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "custom-model");
        assert_eq!(config.capture.block_size, 2048);
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_env_key_overrides_and_is_never_saved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = LiveConfig::load_from(&path).unwrap();
        config.api_key = Some("file-key".to_string());
        config.apply_env(|name| match name {
            "API_KEY" => Some("env-key".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key(), Some("env-key"));

        config.save().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("file-key"));
        assert!(!contents.contains("env-key"));
    }

    #[test]
    fn test_env_precedence_and_blank_values() {
        let mut config = LiveConfig::default();
        config.apply_env(|name| match name {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "API_KEY" => Some("second".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key(), Some("second"));

        config.apply_env(|_| None);
        config.api_key = Some(String::new());
        assert_eq!(config.api_key(), None);
    }

    #[test]
    fn test_session_url() {
        let mut config = LiveConfig::default();
        config.api_key = Some("abc".to_string());
        assert!(config.session_url().ends_with("BidiGenerateContent?key=abc"));
        assert_eq!(config.endpoint_host(), "generativelanguage.googleapis.com");

        config.endpoint = "ws://127.0.0.1:9000/live?alt=json".to_string();
        assert_eq!(config.session_url(), "ws://127.0.0.1:9000/live?alt=json&key=abc");
    }

    #[test]
    fn test_secure_endpoint() {
        assert!(is_secure_endpoint(DEFAULT_ENDPOINT));
        assert!(is_secure_endpoint("ws://localhost:8080/live"));
        assert!(is_secure_endpoint("ws://127.0.0.1:8080/live"));
        assert!(is_secure_endpoint("ws://[::1]:8080/live"));
        assert!(!is_secure_endpoint("ws://example.com/live"));
        assert!(!is_secure_endpoint("https://example.com"));
        assert!(!is_secure_endpoint("not a url"));
    }
}
