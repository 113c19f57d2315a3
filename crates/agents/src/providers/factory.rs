use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::{
    anthropic::AnthropicAdapter,
    base::Adapter,
    configs::{AdapterConfig, ChatAdapterConfig, OllamaAdapterConfig},
    deepseek::DeepseekAdapter,
    gemini::GeminiAdapter,
    ollama::OllamaAdapter,
    openai::{OpenAiCompatibleAdapter, OpenAiProfile, OPENAI, PERPLEXITY, XAI},
};
use crate::errors::AgentResult;

#[derive(EnumIter, EnumString, Display, AsRefStr, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum AdapterType {
    Anthropic,
    #[strum(serialize = "openai")]
    OpenAi,
    Perplexity,
    Xai,
    Deepseek,
    Gemini,
    Ollama,
}

impl AdapterConfig {
    pub fn adapter_type(&self) -> AdapterType {
        match self {
            AdapterConfig::Anthropic(_) => AdapterType::Anthropic,
            AdapterConfig::OpenAi(_) => AdapterType::OpenAi,
            AdapterConfig::Perplexity(_) => AdapterType::Perplexity,
            AdapterConfig::Xai(_) => AdapterType::Xai,
            AdapterConfig::Deepseek(_) => AdapterType::Deepseek,
            AdapterConfig::Gemini(_) => AdapterType::Gemini,
            AdapterConfig::Ollama(_) => AdapterType::Ollama,
        }
    }
}

pub fn get_adapter(config: AdapterConfig) -> AgentResult<Box<dyn Adapter>> {
    match config {
        AdapterConfig::Anthropic(config) => {
            let adapter = AnthropicAdapter::new(&config.api_key)?;
            let adapter = match &config.endpoint {
                Some(endpoint) => adapter.with_endpoint(endpoint),
                None => adapter,
            };
            configure(Box::new(adapter), &config)
        }
        AdapterConfig::OpenAi(config) => openai_compatible(OPENAI, &config),
        AdapterConfig::Perplexity(config) => openai_compatible(PERPLEXITY, &config),
        AdapterConfig::Xai(config) => openai_compatible(XAI, &config),
        AdapterConfig::Deepseek(config) => {
            let adapter = DeepseekAdapter::new(&config.api_key)?;
            let adapter = match &config.endpoint {
                Some(endpoint) => adapter.with_endpoint(endpoint),
                None => adapter,
            };
            configure(Box::new(adapter), &config)
        }
        AdapterConfig::Gemini(config) => {
            let adapter = GeminiAdapter::new(&config.api_key)?;
            let adapter = match &config.endpoint {
                Some(endpoint) => adapter.with_endpoint(endpoint),
                None => adapter,
            };
            configure(Box::new(adapter), &config)
        }
        AdapterConfig::Ollama(config) => ollama(&config),
    }
}

fn openai_compatible(
    profile: OpenAiProfile,
    config: &ChatAdapterConfig,
) -> AgentResult<Box<dyn Adapter>> {
    let adapter = OpenAiCompatibleAdapter::with_profile(profile, &config.api_key)?;
    let adapter = match &config.endpoint {
        Some(endpoint) => adapter.with_endpoint(endpoint),
        None => adapter,
    };
    configure(Box::new(adapter), config)
}

fn ollama(config: &OllamaAdapterConfig) -> AgentResult<Box<dyn Adapter>> {
    let adapter = OllamaAdapter::new()?;
    let mut adapter: Box<dyn Adapter> = match &config.endpoint {
        Some(endpoint) => Box::new(adapter.with_endpoint(endpoint)),
        None => Box::new(adapter),
    };
    if let Some(model) = &config.model {
        adapter.set_model(model)?;
    }
    adapter.set_timeout(config.timeout_ms);
    Ok(adapter)
}

/// Apply the model and generation settings shared by chat adapters
fn configure(
    mut adapter: Box<dyn Adapter>,
    config: &ChatAdapterConfig,
) -> AgentResult<Box<dyn Adapter>> {
    if let Some(model) = &config.model {
        adapter.set_model(model)?;
    }
    adapter.set_max_tokens(config.generation.max_tokens);
    adapter.set_temperature(config.generation.temperature);
    adapter.set_timeout(config.generation.timeout_ms);
    Ok(adapter)
}
