//! Configuration.
//!
//! Loaded once at startup from an optional TOML file, then overridden by
//! environment variables, then validated. The resulting [`Config`] is
//! passed by reference into everything that needs it; nothing reads the
//! environment later except [`Secrets::from_env`], which is also called
//! once at startup.
//!
//! ```toml
//! [cache]
//! root = "./.meetease-cache"
//!
//! [api]
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [transcription]
//! provider = "openai"
//! model = "whisper-1"
//!
//! [embedding]
//! provider = "disabled"
//!
//! [generation]
//! model = "gpt-4o-mini"
//! temperature = 0.2
//! ```
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `MEETEASE_CACHE_ROOT` | `cache.root` |
//! | `MEETEASE_API_BASE_URL` | `api.base_url` |

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const ENV_CACHE_ROOT: &str = "MEETEASE_CACHE_ROOT";
pub const ENV_API_BASE_URL: &str = "MEETEASE_API_BASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./.meetease-cache")
}

/// Hosted API shared by transcription, embedding and generation.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `"tesseract"` or `"disabled"`.
    #[serde(default = "default_ocr_engine")]
    pub engine: String,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: default_ocr_engine(),
            command: default_ocr_command(),
            language: default_ocr_language(),
        }
    }
}

fn default_ocr_engine() -> String {
    "tesseract".to_string()
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_hosted_provider")]
    pub provider: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// ISO-639-1 hint passed to the model; auto-detect when unset.
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_hosted_provider(),
            model: default_transcription_model(),
            language: None,
        }
    }
}

fn default_hosted_provider() -> String {
    "openai".to_string()
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`. Keyword search is used when disabled.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_hosted_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_hosted_provider(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_generation_max_tokens(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_max_tokens() -> u32 {
    1024
}

impl TranscriptionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl OcrConfig {
    pub fn is_enabled(&self) -> bool {
        self.engine != "disabled"
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("failed to parse config: {e}")))
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_CACHE_ROOT).filter(|v| !v.trim().is_empty()) {
            self.cache.root = PathBuf::from(root.trim());
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
    }

    /// Names of enabled collaborators that call the hosted API.
    pub fn hosted_features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.transcription.is_enabled() {
            features.push("transcription");
        }
        if self.embedding.is_enabled() {
            features.push("embedding");
        }
        if self.generation.is_enabled() {
            features.push("generation");
        }
        features
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.root.as_os_str().is_empty() {
            return Err(Error::config("cache.root must not be empty"));
        }

        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }
        if self.api.api_key_env.trim().is_empty() {
            return Err(Error::config("api.api_key_env must name an environment variable"));
        }
        if self.api.timeout_secs == 0 {
            return Err(Error::config("api.timeout_secs must be > 0"));
        }

        match self.ocr.engine.as_str() {
            "tesseract" | "disabled" => {}
            other => {
                return Err(Error::config(format!(
                    "unknown ocr.engine '{other}'. Must be tesseract or disabled."
                )))
            }
        }
        for (section, provider) in [
            ("transcription", &self.transcription.provider),
            ("embedding", &self.embedding.provider),
            ("generation", &self.generation.provider),
        ] {
            match provider.as_str() {
                "openai" | "disabled" => {}
                other => {
                    return Err(Error::config(format!(
                        "unknown {section}.provider '{other}'. Must be openai or disabled."
                    )))
                }
            }
        }

        if self.transcription.is_enabled() && self.transcription.model.trim().is_empty() {
            return Err(Error::config("transcription.model must be set"));
        }
        if self.embedding.is_enabled() {
            if self.embedding.model.trim().is_empty() {
                return Err(Error::config("embedding.model must be set"));
            }
            if self.embedding.batch_size == 0 {
                return Err(Error::config("embedding.batch_size must be > 0"));
            }
        }

        if self.chunking.max_tokens == 0 {
            return Err(Error::config("chunking.max_tokens must be > 0"));
        }

        if self.generation.is_enabled() && self.generation.model.trim().is_empty() {
            return Err(Error::config("generation.model must be set"));
        }
        if !self.generation.temperature.is_finite()
            || !(0.0..=2.0).contains(&self.generation.temperature)
        {
            return Err(Error::config("generation.temperature must be in [0.0, 2.0]"));
        }
        if self.generation.max_tokens == 0 {
            return Err(Error::config("generation.max_tokens must be > 0"));
        }

        Ok(())
    }
}

/// Load configuration: the TOML file if given (it must exist), defaults
/// otherwise, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            Config::from_toml_str(&content)?
        }
        None => Config::default(),
    };
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Credentials injected from the environment.
///
/// The key is never printed; `Debug` shows only whether it is set.
#[derive(Clone, Default)]
pub struct Secrets {
    api_key: Option<String>,
}

impl Secrets {
    /// Read the API key from the variable named by `api.api_key_env`.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigurationError`] if any hosted collaborator is enabled
    /// and the key is missing or blank.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    pub fn resolve(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secrets = Self::lookup(config, lookup);
        secrets.require(config)?;
        Ok(secrets)
    }

    /// Read the key without requiring it. Used by diagnostics, which report
    /// a missing key instead of failing on it.
    pub fn lookup(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = lookup(&config.api.api_key_env)
            .map(|raw| clean_secret(&raw))
            .filter(|key| !key.is_empty());
        Self { api_key }
    }

    /// Fail if a hosted collaborator is enabled and no key is present.
    pub fn require(&self, config: &Config) -> Result<()> {
        let features = config.hosted_features();
        if self.api_key.is_none() && !features.is_empty() {
            return Err(Error::config(format!(
                "{} is not set but is required by: {}. Set it in the environment or a .env \
                 file, or set the provider to \"disabled\".",
                config.api.api_key_env,
                features.join(", ")
            )));
        }
        Ok(())
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &self.api_key.as_ref().map(|_| "(hidden)"))
            .finish()
    }
}

/// Trim whitespace and one layer of surrounding quotes, which `.env` files
/// and copy-paste often leave behind.
fn clean_secret(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
