use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::base::{Adapter, AdapterState, Embedding, Listener};
use super::stream::buffered_request;
use super::utils::ollama_error;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::transport::{HttpRequest, HttpTransport, Transport};

pub const OLLAMA_ENDPOINT: &str = "http://localhost:11434/api/embed";
pub const OLLAMA_DEFAULT_MODEL: &str = "embeddinggemma";
/// Embedding models with a known vector width; any other name is passed to the server as is
pub const OLLAMA_MODELS: &[&str] = &[
    "embeddinggemma",
    "nomic-embed-text",
    "mxbai-embed-large",
    "all-minilm",
];

/// Embeddings from a local Ollama server. Chat is not supported.
pub struct OllamaAdapter {
    state: AdapterState,
    endpoint: String,
}

impl OllamaAdapter {
    pub fn new() -> AgentResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            state: AdapterState::with_transport(OLLAMA_DEFAULT_MODEL, transport),
            endpoint: OLLAMA_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Vector width of the selected model, when known
    pub fn embedding_dimension(&self) -> Option<usize> {
        match self.state.model.as_str() {
            "embeddinggemma" | "nomic-embed-text" => Some(768),
            "mxbai-embed-large" => Some(1024),
            "all-minilm" => Some(384),
            _ => None,
        }
    }

    fn parse_embedding(&self, response: &Value) -> AgentResult<Embedding> {
        let vector = response
            .pointer("/embeddings/0")
            .or_else(|| response.get("embedding"))
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::InvalidResponse {
                vendor: self.name().to_string(),
                reason: "missing embeddings".to_string(),
            })?;

        let embedding = vector
            .iter()
            .map(|value| value.as_f64().map(|v| v as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| AgentError::InvalidResponse {
                vendor: self.name().to_string(),
                reason: "embedding contains non-numeric values".to_string(),
            })?;

        Ok(Embedding {
            embedding,
            tokens_processed: response.get("prompt_eval_count").and_then(Value::as_u64),
            total_duration: response.get("total_duration").and_then(Value::as_u64),
            model_loading_duration: response.get("load_duration").and_then(Value::as_u64),
        })
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AdapterState {
        &mut self.state
    }

    fn models(&self) -> &'static [&'static str] {
        OLLAMA_MODELS
    }

    fn is_schema_supported(&self) -> bool {
        false
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    /// Any locally pulled model may be used
    fn set_model(&mut self, model: &str) -> AgentResult<()> {
        self.state.model = model.to_string();
        Ok(())
    }

    async fn send(
        &mut self,
        _messages: &[Message],
        _listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message> {
        Err(AgentError::ChatNotSupported("Ollama".to_string()))
    }

    async fn embed(&self, text: &str) -> AgentResult<Embedding> {
        let payload = json!({
            "model": self.state.model,
            "input": text,
        });
        let request = HttpRequest::post(&self.endpoint, payload).timeout_ms(self.state.generation.timeout_ms);
        debug!(model = %self.state.model, chars = text.len(), "embedding text");

        let response =
            buffered_request(self.name(), self.state.transport.as_ref(), request, ollama_error).await?;
        self.parse_embedding(&response.value)
    }
}
