use crate::error::{Error, Result};
use crate::prompt::ExtractMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gecko: GeckoConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: crate::llm::Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: crate::llm::Provider::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeckoConfig {
    #[serde(default = "default_gecko_key")]
    pub api_key: String,
    pub base_url: Option<String>,
}

impl Default for GeckoConfig {
    fn default() -> Self {
        Self {
            api_key: default_gecko_key(),
            base_url: None,
        }
    }
}

/// Retry policy for endpoint resolution. Depth and delay are policy
/// constants, not a backoff algorithm; they are configurable on purpose.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub extract_mode: ExtractMode,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            extract_mode: ExtractMode::default(),
        }
    }
}

/// Audio/video pipeline settings. Disabled by default; when enabled, the
/// speech and video service URLs become required configuration.
#[derive(Debug, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub speech_url: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub avatar_image_url: String,
    #[serde(default = "default_media_token")]
    pub api_token: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speech_url: String::new(),
            voice: default_voice(),
            upload_url: default_upload_url(),
            video_url: String::new(),
            avatar_image_url: String::new(),
            api_token: default_media_token(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Override for the history directory (defaults to ~/.coinsage/history).
    pub dir: Option<PathBuf>,
}

// Defaults
fn default_model() -> String {
    "deepseek/deepseek-r1".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_gecko_key() -> String {
    std::env::var("COINGECKO_API_KEY").unwrap_or_default()
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_voice() -> String {
    "alloy".into()
}
fn default_upload_url() -> String {
    "https://tmpfiles.org/api/v1/upload".into()
}
fn default_media_token() -> String {
    std::env::var("MEDIA_API_TOKEN").unwrap_or_default()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("media")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Missing required tokens are fatal at startup, before any request.
    pub fn validate(&self) -> Result<()> {
        if self.gecko.api_key.is_empty() {
            return Err(Error::config(
                "COINGECKO_API_KEY not set. Export it or set gecko.api_key in config.toml",
            ));
        }
        let key_env = self
            .llm
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.llm.provider.default_api_key_env().into());
        let has_llm_key = std::env::var(&key_env).map(|v| !v.is_empty()).unwrap_or(false);
        // Local OpenAI-compatible servers (ollama) run without a key
        if !has_llm_key && !matches!(self.llm.provider, crate::llm::Provider::OpenAi) {
            return Err(Error::config(format!(
                "{key_env} not set. The LLM provider needs an API key"
            )));
        }
        if self.media.enabled {
            if self.media.speech_url.is_empty() {
                return Err(Error::config(
                    "media.enabled but media.speech_url is not configured",
                ));
            }
            if self.media.video_url.is_empty() {
                return Err(Error::config(
                    "media.enabled but media.video_url is not configured",
                ));
            }
            if self.media.avatar_image_url.is_empty() {
                return Err(Error::config(
                    "media.enabled but media.avatar_image_url is not configured",
                ));
            }
        }
        Ok(())
    }
}
