use tracing::{debug, info};

use crate::agent::Agent;
use crate::errors::AgentResult;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::providers::base::{Listener, Usage};

/// Ordered message history driven through one [`Agent`].
///
/// Token counts add up over every `send` of the conversation.
pub struct Conversation {
    agent: Agent,
    messages: Vec<Message>,
    listener: Option<Box<Listener<'static>>>,
    usage: Usage,
}

impl Conversation {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            messages: Vec::new(),
            listener: None,
            usage: Usage::default(),
        }
    }

    /// Receive each streamed fragment of later replies
    pub fn listen<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(&str) -> anyhow::Result<()> + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Append `message` to the history as spoken by `from`
    pub fn message(&mut self, from: &Role, message: Message) -> &mut Self {
        self.messages.push(message.with_role(from.kind()));
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    /// Send the history, record the reply and return it
    pub async fn send(&mut self) -> AgentResult<Message> {
        debug!(
            adapter = self.agent.adapter().name(),
            messages = self.messages.len(),
            "sending conversation"
        );
        let listener = self.listener.as_deref_mut();
        let reply = self.agent.send(&self.messages, listener).await?;

        let adapter = self.agent.adapter();
        let usage = adapter.usage();
        self.usage += usage;
        info!(
            adapter = adapter.name(),
            model = adapter.model(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "reply received"
        );

        let assistant = Role::assistant(adapter.model(), "Assistant");
        self.message(&assistant, reply.clone());
        Ok(reply.with_role(assistant.kind()))
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn input_tokens(&self) -> u64 {
        self.usage.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.usage.output_tokens
    }

    pub fn cache_creation_input_tokens(&self) -> u64 {
        self.usage.cache_creation_input_tokens
    }

    pub fn cache_read_input_tokens(&self) -> u64 {
        self.usage.cache_read_input_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.total()
    }

    pub fn count_input_tokens(&mut self, tokens: u64) {
        self.usage.input_tokens += tokens;
    }

    pub fn count_output_tokens(&mut self, tokens: u64) {
        self.usage.output_tokens += tokens;
    }

    pub fn count_cache_creation_input_tokens(&mut self, tokens: u64) {
        self.usage.cache_creation_input_tokens += tokens;
    }

    pub fn count_cache_read_input_tokens(&mut self, tokens: u64) {
        self.usage.cache_read_input_tokens += tokens;
    }
}
