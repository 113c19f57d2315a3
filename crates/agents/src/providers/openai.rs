//! Chat-completions adapters.
//!
//! OpenAI, Perplexity and XAI speak the same protocol and differ only in
//! the settings captured by an [`OpenAiProfile`].
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::base::{require_agent, Adapter, AdapterState, Listener, Usage};
use super::stream::{buffered_request, stream_request, ChunkEvents, Protocol, UsageTracker};
use super::utils::{image_data_url, openai_error, role_of, u64_at, validate_messages};
use crate::agent::AgentProfile;
use crate::errors::AgentResult;
use crate::models::message::{Message, MessageContent};
use crate::models::schema::Schema;
use crate::transport::{HttpRequest, HttpTransport, Transport};

/// How a vendor is asked for structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredOutput {
    /// A single function tool the model is forced to call
    FunctionCall,
    /// `response_format: {type: json_schema}`
    ResponseFormat,
}

/// Everything that differs between chat-completions vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenAiProfile {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub models: &'static [&'static str],
    pub default_model: &'static str,
    /// `max_completion_tokens` for OpenAI, `max_tokens` elsewhere
    pub max_tokens_field: &'static str,
    /// Ask for a final usage chunk with `stream_options.include_usage`
    pub stream_usage: bool,
    pub structured_output: StructuredOutput,
}

pub const OPENAI: OpenAiProfile = OpenAiProfile {
    name: "openai",
    endpoint: "https://api.openai.com/v1/chat/completions",
    models: &[
        "gpt-4.1",
        "gpt-4.1-mini",
        "gpt-4.1-nano",
        "gpt-4o",
        "gpt-4o-mini",
        "o3",
        "o3-mini",
        "o4-mini",
        "gpt-3.5-turbo",
    ],
    default_model: "gpt-4o",
    max_tokens_field: "max_completion_tokens",
    stream_usage: true,
    structured_output: StructuredOutput::FunctionCall,
};

pub const PERPLEXITY: OpenAiProfile = OpenAiProfile {
    name: "perplexity",
    endpoint: "https://api.perplexity.ai/chat/completions",
    models: &[
        "sonar",
        "sonar-pro",
        "sonar-deep-research",
        "sonar-reasoning",
        "sonar-reasoning-pro",
    ],
    default_model: "sonar",
    max_tokens_field: "max_tokens",
    stream_usage: false,
    structured_output: StructuredOutput::ResponseFormat,
};

pub const XAI: OpenAiProfile = OpenAiProfile {
    name: "xai",
    endpoint: "https://api.x.ai/v1/chat/completions",
    models: &["grok-2-latest", "grok-2-image", "grok-3", "grok-3-mini"],
    default_model: "grok-2-latest",
    max_tokens_field: "max_tokens",
    stream_usage: true,
    structured_output: StructuredOutput::FunctionCall,
};

pub struct OpenAiCompatibleAdapter {
    profile: OpenAiProfile,
    state: AdapterState,
    api_key: String,
    endpoint: String,
}

impl OpenAiCompatibleAdapter {
    pub fn with_profile<S: Into<String>>(profile: OpenAiProfile, api_key: S) -> AgentResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(profile, api_key, Arc::new(transport)))
    }

    pub fn with_transport<S: Into<String>>(
        profile: OpenAiProfile,
        api_key: S,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            profile,
            state: AdapterState::with_transport(profile.default_model, transport),
            api_key: api_key.into(),
            endpoint: profile.endpoint.to_string(),
        }
    }

    pub fn openai<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        Self::with_profile(OPENAI, api_key)
    }

    pub fn perplexity<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        Self::with_profile(PERPLEXITY, api_key)
    }

    pub fn xai<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        Self::with_profile(XAI, api_key)
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn profile(&self) -> &OpenAiProfile {
        &self.profile
    }

    fn build_payload(&self, profile: &AgentProfile, messages: &[Message]) -> Value {
        let mut payload = json!({
            "model": self.state.model,
            "temperature": self.state.generation.temperature,
            "messages": chat_messages(profile, messages),
        });
        payload[self.profile.max_tokens_field] = json!(self.state.generation.max_tokens);

        match (profile.schema(), self.profile.structured_output) {
            (Some(schema), StructuredOutput::FunctionCall) => {
                payload["tools"] = json!([{
                    "type": "function",
                    "function": {
                        "name": schema.name(),
                        "description": schema.description(),
                        "parameters": schema.to_json_schema(),
                    }
                }]);
                payload["tool_choice"] = json!({
                    "type": "function",
                    "function": {"name": schema.name()}
                });
            }
            (Some(schema), StructuredOutput::ResponseFormat) => {
                payload["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {"schema": schema.to_json_schema()}
                });
            }
            (None, _) => {
                payload["stream"] = json!(true);
                if self.profile.stream_usage {
                    payload["stream_options"] = json!({"include_usage": true});
                }
            }
        }
        payload
    }

    fn structured_output(&self, response: &Value, schema: &Schema) -> Option<String> {
        let message = response.pointer("/choices/0/message")?;
        match self.profile.structured_output {
            StructuredOutput::FunctionCall => message
                .get("tool_calls")?
                .as_array()?
                .iter()
                .find(|call| {
                    call.pointer("/function/name").and_then(Value::as_str) == Some(schema.name())
                })
                .and_then(|call| call.pointer("/function/arguments"))
                .and_then(Value::as_str)
                .map(String::from),
            StructuredOutput::ResponseFormat => message
                .get("content")
                .and_then(Value::as_str)
                .filter(|content| !content.is_empty())
                .map(String::from),
        }
    }
}

/// System message followed by the conversation in chat-completions form
pub fn chat_messages(profile: &AgentProfile, messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::with_capacity(messages.len() + 1);
    let system = profile.system_prompt();
    if !system.is_empty() {
        spec.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        let content = match message.content() {
            MessageContent::Text(text) => json!(text),
            MessageContent::Image(_) => json!([{
                "type": "image_url",
                "image_url": {"url": image_data_url(message).unwrap_or_default()}
            }]),
        };
        spec.push(json!({"role": role_of(message).to_string(), "content": content}));
    }
    spec
}

/// Usage object of a chat-completions response.
///
/// Cached prompt tokens are reported inside `prompt_tokens`; they are moved
/// to the cache-read counter.
pub fn chat_usage(usage: &Value) -> Usage {
    let prompt = u64_at(usage, "/prompt_tokens");
    let cached = usage
        .pointer("/prompt_tokens_details/cached_tokens")
        .or_else(|| usage.get("prompt_cache_hit_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Usage::new(
        prompt.saturating_sub(cached),
        u64_at(usage, "/completion_tokens"),
        0,
        cached,
    )
}

/// `chat.completion.chunk` records
#[derive(Default)]
pub struct ChatCompletionsProtocol {
    tracker: UsageTracker,
}

impl Protocol for ChatCompletionsProtocol {
    fn record(&mut self, record: &Value, events: &mut ChunkEvents) {
        if let Some(choices) = record.get("choices").and_then(Value::as_array) {
            for choice in choices {
                if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
                    events.push_fragment(text);
                }
            }
        }
        // some vendors repeat the running usage on every chunk
        if let Some(usage) = record.get("usage").filter(|usage| usage.is_object()) {
            events.usage += self.tracker.advance(chat_usage(usage));
        }
    }

    fn format_error(&self, payload: &Value) -> Option<String> {
        openai_error(payload)
    }
}

#[async_trait]
impl Adapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        self.profile.models
    }

    fn is_schema_supported(&self) -> bool {
        true
    }

    async fn send(
        &mut self,
        messages: &[Message],
        listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message> {
        let profile = require_agent(&self.state)?;
        validate_messages(messages)?;
        self.reset_usage();

        let vendor = self.name();
        let request = HttpRequest::post(&self.endpoint, self.build_payload(&profile, messages))
            .header("authorization", format!("Bearer {}", self.api_key))
            .timeout_ms(self.state.generation.timeout_ms);
        let transport = Arc::clone(&self.state.transport);

        let Some(schema) = profile.schema() else {
            let content = stream_request(
                vendor,
                transport.as_ref(),
                request,
                ChatCompletionsProtocol::default(),
                listener,
                &mut self.state.usage,
            )
            .await?;
            return Ok(Message::assistant(content));
        };

        let response = buffered_request(vendor, transport.as_ref(), request, openai_error).await?;
        if let Some(usage) = response.value.get("usage") {
            self.count_usage(chat_usage(usage));
        }
        let content = self.structured_output(&response.value, schema).unwrap_or_else(|| {
            warn!(vendor, schema = schema.name(), "no structured output in response, returning raw body");
            response.body
        });
        Ok(Message::assistant(content))
    }
}
