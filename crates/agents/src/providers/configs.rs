use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_TIMEOUT_MS: u64 = 90_000;

/// Generation parameters shared by chat adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAdapterConfig {
    pub api_key: String,
    /// Falls back to the vendor's default model
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the vendor endpoint, mostly for proxies and tests
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub generation: GenerationConfig,
}

impl ChatAdapterConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            endpoint: None,
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaAdapterConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OllamaAdapterConfig {
    fn default() -> Self {
        Self {
            model: None,
            endpoint: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Unified enum to wrap the different adapter configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum AdapterConfig {
    Anthropic(ChatAdapterConfig),
    #[serde(rename = "openai")]
    OpenAi(ChatAdapterConfig),
    Perplexity(ChatAdapterConfig),
    Xai(ChatAdapterConfig),
    Deepseek(ChatAdapterConfig),
    Gemini(ChatAdapterConfig),
    Ollama(OllamaAdapterConfig),
}
