use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::{Arc, Weak};

use super::configs::GenerationConfig;
use crate::agent::AgentProfile;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::transport::{HttpTransport, Transport};

/// Token usage counters, always additive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl Usage {
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_input_tokens: u64,
        cache_read_input_tokens: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens,
            cache_read_input_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// Result of an embedding call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f32>,
    pub tokens_processed: Option<u64>,
    pub total_duration: Option<u64>,
    pub model_loading_duration: Option<u64>,
}

/// Receives each streamed text fragment. An error stops the call.
pub type Listener<'a> = dyn FnMut(&str) -> anyhow::Result<()> + Send + 'a;

/// State every adapter carries, whatever the vendor
pub struct AdapterState {
    pub model: String,
    pub generation: GenerationConfig,
    pub usage: Usage,
    pub agent: Option<Weak<AgentProfile>>,
    pub transport: Arc<dyn Transport>,
}

impl AdapterState {
    pub fn new<S: Into<String>>(model: S) -> AgentResult<Self> {
        Ok(Self::with_transport(model, Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport<S: Into<String>>(model: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            model: model.into(),
            generation: GenerationConfig::default(),
            usage: Usage::default(),
            agent: None,
            transport,
        }
    }
}

/// Contract implemented once per vendor (Anthropic, OpenAI-compatible, ...)
///
/// An adapter is a single model session: its counters hold the usage of the
/// most recent `send`, so one instance must not serve two calls at once.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Lowercase vendor name, e.g. `"anthropic"`
    fn name(&self) -> &'static str;

    fn state(&self) -> &AdapterState;

    fn state_mut(&mut self) -> &mut AdapterState;

    /// Models accepted by [`Adapter::set_model`]
    fn models(&self) -> &'static [&'static str];

    fn is_schema_supported(&self) -> bool;

    fn supports_embeddings(&self) -> bool {
        false
    }

    /// Send the conversation history and return the aggregated reply.
    ///
    /// Resets the usage counters, then accumulates the usage of this call.
    /// When streaming, `listener` receives every non-empty fragment in order.
    async fn send(
        &mut self,
        messages: &[Message],
        listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message>;

    async fn embed(&self, _text: &str) -> AgentResult<Embedding> {
        Err(AgentError::EmbeddingsNotSupported(self.name().to_string()))
    }

    fn model(&self) -> &str {
        &self.state().model
    }

    fn set_model(&mut self, model: &str) -> AgentResult<()> {
        if !self.models().iter().any(|m| *m == model) {
            return Err(AgentError::UnsupportedModel(model.to_string()));
        }
        self.state_mut().model = model.to_string();
        Ok(())
    }

    fn max_tokens(&self) -> u32 {
        self.state().generation.max_tokens
    }

    fn set_max_tokens(&mut self, max_tokens: u32) {
        self.state_mut().generation.max_tokens = max_tokens;
    }

    fn temperature(&self) -> f32 {
        self.state().generation.temperature
    }

    fn set_temperature(&mut self, temperature: f32) {
        self.state_mut().generation.temperature = temperature;
    }

    /// Request timeout in milliseconds
    fn timeout(&self) -> u64 {
        self.state().generation.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.state_mut().generation.timeout_ms = timeout_ms;
    }

    fn agent(&self) -> Option<Arc<AgentProfile>> {
        self.state().agent.as_ref().and_then(Weak::upgrade)
    }

    fn set_agent(&mut self, agent: Weak<AgentProfile>) {
        self.state_mut().agent = Some(agent);
    }

    fn usage(&self) -> Usage {
        self.state().usage
    }

    fn input_tokens(&self) -> u64 {
        self.state().usage.input_tokens
    }

    fn output_tokens(&self) -> u64 {
        self.state().usage.output_tokens
    }

    fn cache_creation_input_tokens(&self) -> u64 {
        self.state().usage.cache_creation_input_tokens
    }

    fn cache_read_input_tokens(&self) -> u64 {
        self.state().usage.cache_read_input_tokens
    }

    fn total_tokens(&self) -> u64 {
        self.state().usage.total()
    }

    fn count_input_tokens(&mut self, tokens: u64) {
        self.state_mut().usage.input_tokens += tokens;
    }

    fn count_output_tokens(&mut self, tokens: u64) {
        self.state_mut().usage.output_tokens += tokens;
    }

    fn count_cache_creation_input_tokens(&mut self, tokens: u64) {
        self.state_mut().usage.cache_creation_input_tokens += tokens;
    }

    fn count_cache_read_input_tokens(&mut self, tokens: u64) {
        self.state_mut().usage.cache_read_input_tokens += tokens;
    }

    fn count_usage(&mut self, usage: Usage) {
        self.state_mut().usage += usage;
    }

    fn reset_usage(&mut self) {
        self.state_mut().usage = Usage::default();
    }
}

/// Fetch the attached agent or fail before any network call
pub fn require_agent(state: &AdapterState) -> AgentResult<Arc<AgentProfile>> {
    state
        .agent
        .as_ref()
        .and_then(Weak::upgrade)
        .ok_or(AgentError::AgentNotSet)
}
