use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

use super::base::{require_agent, Adapter, AdapterState, Listener, Usage};
use super::stream::{buffered_request, stream_request, ChunkEvents, Protocol, UsageTracker};
use super::utils::{encode_image, gemini_error, role_of, system_segments, u64_at, validate_messages};
use crate::agent::AgentProfile;
use crate::errors::AgentResult;
use crate::models::message::{Message, MessageContent};
use crate::models::role::RoleKind;
use crate::models::schema::Schema;
use crate::transport::{HttpRequest, HttpTransport, Transport};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

pub struct GeminiAdapter {
    state: AdapterState,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(api_key, Arc::new(transport)))
    }

    pub fn with_transport<S: Into<String>>(api_key: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: AdapterState::with_transport(GEMINI_DEFAULT_MODEL, transport),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Replace the `.../models` base the model name is appended to
    pub fn with_endpoint<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The key travels in the query string
    fn url(&self, streaming: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        if streaming {
            format!(
                "{}/{}:streamGenerateContent?alt=sse&key={}",
                base, self.state.model, self.api_key
            )
        } else {
            format!("{}/{}:generateContent?key={}", base, self.state.model, self.api_key)
        }
    }

    fn messages_to_gemini_spec(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let role = match role_of(message) {
                    RoleKind::User => "user",
                    RoleKind::Assistant => "model",
                };
                let part = match message.content() {
                    MessageContent::Text(text) => json!({"text": text}),
                    MessageContent::Image(_) => {
                        let (mime_type, data) = encode_image(message).unwrap_or_default();
                        json!({"inline_data": {"mime_type": mime_type, "data": data}})
                    }
                };
                json!({"role": role, "parts": [part]})
            })
            .collect()
    }

    fn build_payload(&self, profile: &AgentProfile, messages: &[Message]) -> Value {
        let mut payload = json!({
            "contents": Self::messages_to_gemini_spec(messages),
            "generationConfig": {
                "maxOutputTokens": self.state.generation.max_tokens,
                "temperature": self.state.generation.temperature,
            },
        });

        let parts: Vec<Value> = system_segments(profile)
            .into_iter()
            .map(|text| json!({"text": text}))
            .collect();
        if !parts.is_empty() {
            payload["system_instruction"] = json!({"parts": parts});
        }

        if let Some(schema) = profile.schema() {
            payload["tools"] = json!([{"functionDeclarations": [Self::schema_to_function(schema)]}]);
            payload["toolConfig"] = json!({
                "functionCallingConfig": {
                    "mode": "ANY",
                    "allowedFunctionNames": [schema.name()],
                }
            });
        }
        payload
    }

    fn schema_to_function(schema: &Schema) -> Value {
        json!({
            "name": schema.name(),
            "description": schema.description(),
            "parameters": gemini_types(schema.to_json_schema()),
        })
    }

    /// Arguments of the forced function call, serialized
    fn structured_output(response: &Value, name: &str) -> Option<String> {
        response
            .pointer("/candidates/0/content/parts")?
            .as_array()?
            .iter()
            .filter_map(|part| part.get("functionCall"))
            .find(|call| call.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|call| call.get("args"))
            .map(Value::to_string)
    }
}

/// Gemini's OpenAPI subset spells types in upper case
fn gemini_types(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let converted: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(kind)) => Value::String(kind.to_uppercase()),
                        // property names must survive untouched
                        ("properties", Value::Object(properties)) => Value::Object(
                            properties
                                .into_iter()
                                .map(|(name, property)| (name, gemini_types(property)))
                                .collect(),
                        ),
                        (_, value) => gemini_types(value),
                    };
                    (key, value)
                })
                .collect();
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(gemini_types).collect()),
        other => other,
    }
}

/// `usageMetadata` is a running total on every chunk
fn usage_snapshot(metadata: &Value) -> Usage {
    let cached = u64_at(metadata, "/cachedContentTokenCount");
    Usage::new(
        u64_at(metadata, "/promptTokenCount").saturating_sub(cached),
        u64_at(metadata, "/candidatesTokenCount") + u64_at(metadata, "/thoughtsTokenCount"),
        0,
        cached,
    )
}

#[derive(Default)]
struct GeminiProtocol {
    tracker: UsageTracker,
}

impl Protocol for GeminiProtocol {
    fn record(&mut self, record: &Value, events: &mut ChunkEvents) {
        if let Some(parts) = record
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    events.push_fragment(text);
                }
            }
        }
        if let Some(metadata) = record.get("usageMetadata") {
            events.usage += self.tracker.advance(usage_snapshot(metadata));
        }
    }

    fn format_error(&self, payload: &Value) -> Option<String> {
        gemini_error(payload)
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        GEMINI_MODELS
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
        let schema = profile.schema();
        let request = HttpRequest::post(self.url(schema.is_none()), self.build_payload(&profile, messages))
            .timeout_ms(self.state.generation.timeout_ms);
        let transport = Arc::clone(&self.state.transport);

        let Some(schema) = schema else {
            let content = stream_request(
                vendor,
                transport.as_ref(),
                request,
                GeminiProtocol::default(),
                listener,
                &mut self.state.usage,
            )
            .await?;
            return Ok(Message::assistant(content));
        };

        let response = buffered_request(vendor, transport.as_ref(), request, gemini_error).await?;
        if let Some(metadata) = response.value.get("usageMetadata") {
            self.count_usage(usage_snapshot(metadata));
        }
        let content = Self::structured_output(&response.value, schema.name()).unwrap_or_else(|| {
            warn!(schema = schema.name(), "no functionCall in response, returning raw body");
            response.body
        });
        Ok(Message::assistant(content))
    }
}
