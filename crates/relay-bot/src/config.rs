use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use relay_core::{DisplayConfig, DEFAULT_MAX_ENTRIES};

/// Telegram rejects messages longer than this many UTF-16 code units.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
const DEFAULT_MODEL: &str = "deepseek-r1-250120";
const DEFAULT_MAX_TOKENS: u32 = 5120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Prepended to every request as the system message.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Omitted from requests when unset, letting the server pick.
    #[serde(default = "default_model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Extra parameters to pass to the API (e.g., reasoning_effort, thinking)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages kept per user; 0 keeps everything.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_system_prompt() -> String {
    "You are a friendly AI assistant that helps with programming and everyday questions."
        .to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> Option<String> {
    Some(DEFAULT_MODEL.to_string())
}

fn default_max_tokens() -> Option<u32> {
    Some(DEFAULT_MAX_TOKENS)
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            provider: ProviderConfig::default(),
            system_prompt: default_system_prompt(),
            history: HistoryConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            parameters: HashMap::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl Config {
    /// Load the effective configuration.
    ///
    /// Layers, later wins: built-in defaults, the TOML file (`path` or
    /// `~/.config/relay/config.toml`, optional), `RELAY_*` variables with `__`
    /// for nesting, then the conventional `TELEGRAM_BOT_TOKEN`,
    /// `OPENAI_API_KEY`/`ARK_API_KEY` and `MAX_TOKENS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => Self::config_path()?,
        };

        Self::figment(&path)
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", path.display()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(well_known_env("TELEGRAM_BOT_TOKEN", "telegram.token"))
            .merge(well_known_env("OPENAI_API_KEY", "provider.api_key"))
            .merge(well_known_env("ARK_API_KEY", "provider.api_key"))
            .merge(well_known_env("MAX_TOKENS", "provider.max_tokens"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("relay"))
    }

    /// Check what the bot needs before it connects anywhere.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!(
                "No Telegram bot token configured. Set TELEGRAM_BOT_TOKEN or add to {}:\n\n\
                 [telegram]\n\
                 token = \"123456:ABC...\"\n",
                Self::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".to_string())
            );
        }
        if self.provider.api_key.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("No API key configured. Set ARK_API_KEY, OPENAI_API_KEY or [provider] api_key");
        }

        let max = self.display.max_segment_length;
        if max == 0 || max > TELEGRAM_MAX_MESSAGE_LENGTH {
            anyhow::bail!(
                "display.max_segment_length must be between 1 and {} (got {})",
                TELEGRAM_MAX_MESSAGE_LENGTH,
                max
            );
        }
        if self.display.flush_interval_ms == 0 {
            anyhow::bail!("display.flush_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// Copy safe for printing: secrets are reduced to a hint.
    pub fn masked(&self) -> Self {
        let mut config = self.clone();
        config.telegram.token = config.telegram.token.as_deref().map(mask_secret);
        config.provider.api_key = config.provider.api_key.as_deref().map(mask_secret);
        config
    }
}

/// Map one conventional variable onto a config key.
fn well_known_env(var: &'static str, key: &'static str) -> Env {
    Env::raw().only(&[var]).map(move |_| key.into())
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn load_in(jail: &Jail, file: &str) -> figment::error::Result<Config> {
        Config::load(Some(&jail.directory().join(file))).map_err(|e| format!("{e:#}").into())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.provider.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.provider.max_tokens, Some(5120));
        assert_eq!(config.history.max_entries, 10);
        assert_eq!(config.display.max_segment_length, 4000);
        assert!(!config.system_prompt.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            system_prompt = "Be brief."

            [provider]
            api_key = "sk-test"
            model = "gpt-4o"

            [display]
            flush_interval_ms = 800
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.provider.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.display.flush_interval_ms, 800);
        assert_eq!(config.display.placeholder, "Thinking...");
        assert!(config.telegram.token.is_none());
    }

    #[test]
    fn test_layering_file_then_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "relay.toml",
                r#"
                    [telegram]
                    token = "file-token"

                    [provider]
                    model = "file-model"
                    max_tokens = 100
                "#,
            )?;
            jail.set_env("RELAY_PROVIDER__MODEL", "env-model");
            jail.set_env("RELAY_DISPLAY__MAX_SEGMENT_LENGTH", "1000");

            let config = load_in(jail, "relay.toml")?;
            assert_eq!(config.telegram.token.as_deref(), Some("file-token"));
            assert_eq!(config.provider.model.as_deref(), Some("env-model"));
            assert_eq!(config.provider.max_tokens, Some(100));
            assert_eq!(config.display.max_segment_length, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_well_known_variables_win() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("relay.toml", "[provider]\napi_key = \"from-file\"\n")?;
            jail.set_env("TELEGRAM_BOT_TOKEN", "123:abc");
            jail.set_env("OPENAI_API_KEY", "sk-openai");
            jail.set_env("ARK_API_KEY", "ark-key");
            jail.set_env("MAX_TOKENS", "2048");

            let config = load_in(jail, "relay.toml")?;
            assert_eq!(config.telegram.token.as_deref(), Some("123:abc"));
            assert_eq!(config.provider.api_key.as_deref(), Some("ark-key"));
            assert_eq!(config.provider.max_tokens, Some(2048));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.telegram.token = Some("123:abc".to_string());
        config.provider.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());

        config.display.max_segment_length = 5000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_segment_length"));
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = Config::default();
        config.telegram.token = Some("1234567890:ABCDEFGHIJ".to_string());
        config.provider.api_key = Some("short".to_string());

        let masked = config.masked();
        assert_eq!(masked.telegram.token.as_deref(), Some("1234...GHIJ"));
        assert_eq!(masked.provider.api_key.as_deref(), Some("****"));
        assert_eq!(masked.provider.model, config.provider.model);
    }
}
