use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::base::{require_agent, Adapter, AdapterState, Listener, Usage};
use super::stream::{buffered_request, stream_request, ChunkEvents, Protocol, UsageTracker};
use super::utils::{anthropic_error, encode_image, role_of, system_segments, u64_at, validate_messages};
use crate::agent::AgentProfile;
use crate::errors::AgentResult;
use crate::models::message::{Message, MessageContent};
use crate::models::schema::Schema;
use crate::transport::{HttpRequest, HttpTransport, Transport};

pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-0";
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-opus-4-1",
    "claude-opus-4-0",
    "claude-sonnet-4-0",
    "claude-3-7-sonnet-latest",
    "claude-3-5-haiku-latest",
];

/// Anthropic accepts at most four cache breakpoints per request. The
/// description takes one of them, leaving three for instructions.
const MAX_CACHED_SEGMENTS: usize = 4;

pub struct AnthropicAdapter {
    state: AdapterState,
    api_key: String,
    endpoint: String,
}

impl AnthropicAdapter {
    pub fn new<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(api_key, Arc::new(transport)))
    }

    pub fn with_transport<S: Into<String>>(api_key: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: AdapterState::with_transport(ANTHROPIC_DEFAULT_MODEL, transport),
            api_key: api_key.into(),
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// System text blocks; the leading segments are marked cacheable
    fn system_blocks(profile: &AgentProfile) -> Vec<Value> {
        system_segments(profile)
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let mut block = json!({"type": "text", "text": text});
                // the request is rejected past the breakpoint limit
                if index < MAX_CACHED_SEGMENTS {
                    block["cache_control"] = json!({"type": "ephemeral"});
                }
                block
            })
            .collect()
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let content = match message.content() {
                    MessageContent::Text(text) => json!(text),
                    MessageContent::Image(_) => {
                        let (media_type, data) = encode_image(message).unwrap_or_default();
                        json!([{
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": data,
                            }
                        }])
                    }
                };
                json!({
                    "role": role_of(message).to_string(),
                    "content": content,
                })
            })
            .collect()
    }

    fn build_payload(&self, profile: &AgentProfile, messages: &[Message]) -> Value {
        let mut payload = json!({
            "model": self.state.model,
            "max_tokens": self.state.generation.max_tokens,
            "temperature": self.state.generation.temperature,
            "messages": Self::messages_to_anthropic_spec(messages),
        });

        let system = Self::system_blocks(profile);
        if !system.is_empty() {
            payload["system"] = json!(system);
        }

        match profile.schema() {
            Some(schema) => {
                payload["tools"] = json!([Self::schema_to_tool(schema)]);
                payload["tool_choice"] = json!({"type": "tool", "name": schema.name()});
            }
            None => payload["stream"] = json!(true),
        }
        payload
    }

    fn schema_to_tool(schema: &Schema) -> Value {
        json!({
            "name": schema.name(),
            "description": schema.description(),
            "input_schema": schema.to_json_schema(),
        })
    }

    fn request(&self, payload: Value) -> HttpRequest {
        HttpRequest::post(&self.endpoint, payload)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout_ms(self.state.generation.timeout_ms)
    }

    fn get_usage(usage: &Value) -> Usage {
        Usage::new(
            u64_at(usage, "/input_tokens"),
            u64_at(usage, "/output_tokens"),
            u64_at(usage, "/cache_creation_input_tokens"),
            u64_at(usage, "/cache_read_input_tokens"),
        )
    }

    /// Input of the forced `tool_use` block, serialized
    fn structured_output(response: &Value, name: &str) -> Option<String> {
        response
            .get("content")?
            .as_array()?
            .iter()
            .find(|block| {
                block.get("type").and_then(Value::as_str) == Some("tool_use")
                    && block.get("name").and_then(Value::as_str) == Some(name)
            })
            .and_then(|block| block.get("input"))
            .map(Value::to_string)
    }
}

/// Server-sent events of the messages API
#[derive(Default)]
struct AnthropicProtocol {
    tracker: UsageTracker,
}

impl AnthropicProtocol {
    /// `message_delta` repeats only the counters that changed
    fn snapshot(&self, usage: &Value) -> Usage {
        let last = self.tracker.last();
        let field = |name: &str, previous: u64| usage.get(name).and_then(Value::as_u64).unwrap_or(previous);
        Usage::new(
            field("input_tokens", last.input_tokens),
            field("output_tokens", last.output_tokens),
            field("cache_creation_input_tokens", last.cache_creation_input_tokens),
            field("cache_read_input_tokens", last.cache_read_input_tokens),
        )
    }
}

impl Protocol for AnthropicProtocol {
    fn record(&mut self, record: &Value, events: &mut ChunkEvents) {
        match record.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = record.pointer("/message/usage") {
                    let snapshot = self.snapshot(usage);
                    events.usage += self.tracker.advance(snapshot);
                }
            }
            Some("content_block_delta") => {
                if record.pointer("/delta/type").and_then(Value::as_str) == Some("text_delta") {
                    if let Some(text) = record.pointer("/delta/text").and_then(Value::as_str) {
                        events.push_fragment(text);
                    }
                }
            }
            Some("message_delta") => {
                if let Some(usage) = record.get("usage") {
                    let snapshot = self.snapshot(usage);
                    events.usage += self.tracker.advance(snapshot);
                }
            }
            // content_block_start, content_block_stop, message_stop, ping
            _ => {}
        }
    }

    fn format_error(&self, payload: &Value) -> Option<String> {
        anthropic_error(payload)
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        ANTHROPIC_MODELS
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
        let request = self.request(self.build_payload(&profile, messages));
        let transport = Arc::clone(&self.state.transport);

        let Some(schema) = profile.schema() else {
            let content = stream_request(
                vendor,
                transport.as_ref(),
                request,
                AnthropicProtocol::default(),
                listener,
                &mut self.state.usage,
            )
            .await?;
            return Ok(Message::assistant(content));
        };

        let response = buffered_request(vendor, transport.as_ref(), request, anthropic_error).await?;
        if let Some(usage) = response.value.get("usage") {
            self.count_usage(Self::get_usage(usage));
        }
        let content = Self::structured_output(&response.value, schema.name()).unwrap_or_else(|| {
            warn!(schema = schema.name(), "no tool_use block in response, returning raw body");
            response.body
        });
        Ok(Message::assistant(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::role::RoleKind;
    use crate::models::schema::{Property, PropertyType, SchemaObject};
    use crate::providers::stream::StreamDecoder;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":25,\"output_tokens\":1,\"cache_creation_input_tokens\":10,\"cache_read_input_tokens\":4}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":15}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn weather() -> Schema {
        let object = SchemaObject::new()
            .with_property("location", Property::new(PropertyType::String, "City"))
            .with_property(
                "unit",
                Property::new(PropertyType::String, "Unit").with("enum", json!(["celsius", "fahrenheit"])),
            );
        Schema::new("get_weather", "Current weather", object, ["location", "unit"])
    }

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, AnthropicAdapter) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let adapter = AnthropicAdapter::new("test_api_key")
            .unwrap()
            .with_endpoint(format!("{}/v1/messages", mock_server.uri()));
        (mock_server, adapter)
    }

    fn attach(adapter: &mut AnthropicAdapter, profile: AgentProfile) -> Arc<AgentProfile> {
        let profile = Arc::new(profile);
        adapter.set_agent(Arc::downgrade(&profile));
        profile
    }

    #[test]
    fn test_single_delta_then_sentinel() {
        let mut decoder = StreamDecoder::new(AnthropicProtocol::default());
        let events = decoder.decode(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\ndata: [DONE]\n",
        );
        assert_eq!(events.fragments, vec!["Hi"]);
        assert_eq!(events.error, None);
    }

    #[test]
    fn test_message_delta_usage_is_not_double_counted() {
        let mut decoder = StreamDecoder::new(AnthropicProtocol::default());
        let mut events = ChunkEvents::default();
        for line in STREAM.split_inclusive('\n') {
            events.merge(decoder.decode(line));
        }
        assert_eq!(events.text(), "Hello there");
        assert_eq!(events.usage, Usage::new(25, 15, 10, 4));
    }

    #[test]
    fn test_cache_control_on_first_four_segments() {
        let profile = AgentProfile::new("Reviewer")
            .with_instruction("One", "1")
            .with_instruction("Two", "2")
            .with_instruction("Three", "3")
            .with_instruction("Four", "4");
        let blocks = AnthropicAdapter::system_blocks(&profile);

        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0]["text"], "Reviewer");
        assert_eq!(blocks[1]["text"], "# One\n\n1");
        assert!(blocks[..4].iter().all(|b| b["cache_control"]["type"] == "ephemeral"));
        assert!(blocks[4].get("cache_control").is_none());
    }

    #[test]
    fn test_image_message_spec() {
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let spec = AnthropicAdapter::messages_to_anthropic_spec(&[
            Message::user("Describe this"),
            Message::image(png).with_role(RoleKind::User),
        ]);
        assert_eq!(spec[0], json!({"role": "user", "content": "Describe this"}));
        assert_eq!(spec[1]["content"][0]["type"], "image");
        assert_eq!(spec[1]["content"][0]["source"]["media_type"], "image/png");
    }

    #[tokio::test]
    async fn test_send_streams_fragments() -> anyhow::Result<()> {
        let (mock_server, mut adapter) = setup_mock_server(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(STREAM),
        )
        .await;
        let _profile = attach(&mut adapter, AgentProfile::new("Be helpful"));

        let mut fragments = Vec::new();
        let mut listener = |fragment: &str| -> anyhow::Result<()> {
            fragments.push(fragment.to_string());
            Ok(())
        };
        let reply = adapter.send(&[Message::user("Hello?")], Some(&mut listener)).await?;

        assert_eq!(reply.as_text(), Some("Hello there"));
        assert_eq!(reply.role(), Some(RoleKind::Assistant));
        assert_eq!(fragments, vec!["Hello", " there"]);
        assert_eq!(adapter.input_tokens(), 25);
        assert_eq!(adapter.output_tokens(), 15);
        assert_eq!(adapter.cache_creation_input_tokens(), 10);
        assert_eq!(adapter.cache_read_input_tokens(), 4);

        let received = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body)?;
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], ANTHROPIC_DEFAULT_MODEL);
        assert_eq!(body["system"][0]["text"], "Be helpful");
        Ok(())
    }

    #[tokio::test]
    async fn test_usage_resets_between_sends() -> anyhow::Result<()> {
        let (_server, mut adapter) =
            setup_mock_server(ResponseTemplate::new(200).set_body_string(STREAM)).await;
        let _profile = attach(&mut adapter, AgentProfile::default());

        adapter.send(&[Message::user("one")], None).await?;
        adapter.send(&[Message::user("two")], None).await?;
        assert_eq!(adapter.total_tokens(), 54);
        Ok(())
    }

    #[tokio::test]
    async fn test_structured_output_uses_forced_tool() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "tool_choice": {"type": "tool", "name": "get_weather"},
                "tools": [{"name": "get_weather", "input_schema": {"required": ["location", "unit"]}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Sure"},
                    {"type": "tool_use", "id": "tu_1", "name": "get_weather", "input": {"location": "Paris", "unit": "celsius"}}
                ],
                "usage": {"input_tokens": 40, "output_tokens": 12}
            })))
            .mount(&mock_server)
            .await;

        let mut adapter = AnthropicAdapter::new("test_api_key")?.with_endpoint(mock_server.uri());
        let _profile = attach(&mut adapter, AgentProfile::new("Weather").with_schema(weather()));

        let reply = adapter.send(&[Message::user("Weather in Paris?")], None).await?;
        let output: Value = serde_json::from_str(reply.as_text().unwrap())?;
        assert_eq!(output, json!({"location": "Paris", "unit": "celsius"}));
        assert_eq!(adapter.input_tokens(), 40);
        assert_eq!(adapter.output_tokens(), 12);

        let received = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body)?;
        assert!(body.get("stream").is_none());
        assert_eq!(
            body["tools"][0]["input_schema"]["properties"]["unit"]["enum"],
            json!(["celsius", "fahrenheit"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_structured_output_falls_back_to_raw_body() -> anyhow::Result<()> {
        let body = json!({"content": [{"type": "text", "text": "No tool today"}]});
        let (_server, mut adapter) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(body.clone())).await;
        let _profile = attach(&mut adapter, AgentProfile::default().with_schema(weather()));

        let reply = adapter.send(&[Message::user("Weather?")], None).await?;
        let raw: Value = serde_json::from_str(reply.as_text().unwrap())?;
        assert_eq!(raw, body);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status() {
        let (_server, mut adapter) = setup_mock_server(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .await;
        let _profile = attach(&mut adapter, AgentProfile::default());

        let err = adapter.send(&[Message::user("Hello?")], None).await.unwrap_err();
        assert_eq!(err.status(), Some(529));
        assert_eq!(err.to_string(), "Anthropic API error: (overloaded_error) Overloaded");
    }

    #[tokio::test]
    async fn test_send_requires_agent_and_valid_messages() {
        let mut adapter = AnthropicAdapter::new("test_api_key").unwrap();
        let err = adapter.send(&[Message::user("Hi")], None).await.unwrap_err();
        assert!(matches!(err, AgentError::AgentNotSet));

        let _profile = attach(&mut adapter, AgentProfile::default());
        let err = adapter.send(&[Message::text("no role")], None).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedMessage));
    }

    #[test]
    fn test_model_list_is_closed() {
        let mut adapter = AnthropicAdapter::new("key").unwrap();
        assert_eq!(adapter.model(), "claude-sonnet-4-0");
        assert!(adapter.set_model("claude-3-5-haiku-latest").is_ok());
        assert!(adapter.set_model("claude-2").is_err());
    }
}
