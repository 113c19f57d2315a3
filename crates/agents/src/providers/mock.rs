use async_trait::async_trait;
use reqwest::Client;
use std::sync::{Arc, Mutex};

use super::base::{require_agent, Adapter, AdapterState, Listener, Usage};
use super::utils::validate_messages;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::transport::HttpTransport;

pub const MOCK_MODELS: &[&str] = &["mock", "mock-large"];

/// A mock adapter that returns pre-configured responses for testing
pub struct MockAdapter {
    state: AdapterState,
    responses: Arc<Mutex<Vec<Message>>>,
    received: Arc<Mutex<Vec<Vec<Message>>>>,
    usage: Usage,
    schema_support: bool,
}

impl MockAdapter {
    /// Create a new mock adapter with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        let transport = Arc::new(HttpTransport::with_client(Client::new()));
        Self {
            state: AdapterState::with_transport("mock", transport),
            responses: Arc::new(Mutex::new(responses)),
            received: Arc::new(Mutex::new(Vec::new())),
            usage: Usage::default(),
            schema_support: false,
        }
    }

    /// Usage reported by every send
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_schema_support(mut self) -> Self {
        self.schema_support = true;
        self
    }

    /// Histories passed to each send so far
    pub fn received(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.received)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        MOCK_MODELS
    }

    fn is_schema_supported(&self) -> bool {
        self.schema_support
    }

    async fn send(
        &mut self,
        messages: &[Message],
        listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message> {
        require_agent(&self.state)?;
        validate_messages(messages)?;
        self.reset_usage();
        self.received.lock().unwrap().push(messages.to_vec());

        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // Return empty response if no more pre-configured responses
                Message::assistant("")
            } else {
                responses.remove(0)
            }
        };

        if let (Some(listener), Some(text)) = (listener, response.as_text()) {
            if !text.is_empty() {
                listener(text).map_err(AgentError::Listener)?;
            }
        }
        let usage = self.usage;
        self.count_usage(usage);
        Ok(response)
    }
}
