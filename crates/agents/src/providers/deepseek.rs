use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::base::{require_agent, Adapter, AdapterState, Listener};
use super::openai::{chat_messages, ChatCompletionsProtocol};
use super::stream::stream_request;
use super::utils::validate_messages;
use crate::agent::AgentProfile;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::transport::{HttpRequest, HttpTransport, Transport};

pub const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";
pub const DEEPSEEK_DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-coder", "deepseek-reasoner"];

/// Deepseek speaks chat completions but has no structured output and no image input
pub struct DeepseekAdapter {
    state: AdapterState,
    api_key: String,
    endpoint: String,
}

impl DeepseekAdapter {
    pub fn new<S: Into<String>>(api_key: S) -> AgentResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(api_key, Arc::new(transport)))
    }

    pub fn with_transport<S: Into<String>>(api_key: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: AdapterState::with_transport(DEEPSEEK_DEFAULT_MODEL, transport),
            api_key: api_key.into(),
            endpoint: DEEPSEEK_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn check_content(&self, messages: &[Message]) -> AgentResult<()> {
        match messages
            .iter()
            .find(|message| matches!(message.content(), MessageContent::Image(_)))
        {
            Some(message) => Err(AgentError::UnsupportedContent {
                vendor: self.name().to_string(),
                kind: message.content().kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn build_payload(&self, profile: &AgentProfile, messages: &[Message]) -> Value {
        json!({
            "model": self.state.model,
            "max_tokens": self.state.generation.max_tokens,
            "temperature": self.state.generation.temperature,
            "messages": chat_messages(profile, messages),
            "stream": true,
        })
    }
}

#[async_trait]
impl Adapter for DeepseekAdapter {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        DEEPSEEK_MODELS
    }

    fn is_schema_supported(&self) -> bool {
        false
    }

    async fn send(
        &mut self,
        messages: &[Message],
        listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message> {
        let profile = require_agent(&self.state)?;
        validate_messages(messages)?;
        self.check_content(messages)?;
        self.reset_usage();

        let vendor = self.name();
        let request = HttpRequest::post(&self.endpoint, self.build_payload(&profile, messages))
            .header("authorization", format!("Bearer {}", self.api_key))
            .timeout_ms(self.state.generation.timeout_ms);
        let transport = Arc::clone(&self.state.transport);

        let content = stream_request(
            vendor,
            transport.as_ref(),
            request,
            ChatCompletionsProtocol::default(),
            listener,
            &mut self.state.usage,
        )
        .await?;
        Ok(Message::assistant(content))
    }
}
