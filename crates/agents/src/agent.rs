use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::schema::Schema;
use crate::providers::base::{Adapter, Embedding, Listener};

/// Body of a named instruction, either a block of text or lines joined by `\n`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instruction {
    Text(String),
    Lines(Vec<String>),
}

impl Instruction {
    pub fn render(&self) -> String {
        match self {
            Instruction::Text(text) => text.clone(),
            Instruction::Lines(lines) => lines.join("\n"),
        }
    }
}

impl From<&str> for Instruction {
    fn from(text: &str) -> Self {
        Instruction::Text(text.to_string())
    }
}

impl From<String> for Instruction {
    fn from(text: String) -> Self {
        Instruction::Text(text)
    }
}

impl From<Vec<String>> for Instruction {
    fn from(lines: Vec<String>) -> Self {
        Instruction::Lines(lines)
    }
}

impl From<Vec<&str>> for Instruction {
    fn from(lines: Vec<&str>) -> Self {
        Instruction::Lines(lines.into_iter().map(String::from).collect())
    }
}

/// What the model should behave like, independent of the vendor answering.
///
/// Adapters read this through a weak reference while building requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentProfile {
    description: String,
    instructions: IndexMap<String, Instruction>,
    schema: Option<Schema>,
}

impl AgentProfile {
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_instruction<N: Into<String>, C: Into<Instruction>>(
        mut self,
        name: N,
        content: C,
    ) -> Self {
        self.instructions.insert(name.into(), content.into());
        self
    }

    /// Attach a schema without checking adapter support; see [`Agent::set_schema`]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instructions(&self) -> &IndexMap<String, Instruction> {
        &self.instructions
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Each instruction rendered as `# name\n\ncontent`, in insertion order
    pub fn instruction_segments(&self) -> Vec<String> {
        self.instructions
            .iter()
            .map(|(name, content)| format!("# {}\n\n{}", name, content.render()))
            .collect()
    }

    /// Description followed by every instruction segment
    pub fn system_prompt(&self) -> String {
        let segments = self.instruction_segments();
        if segments.is_empty() {
            return self.description.clone();
        }
        if self.description.is_empty() {
            return segments.join("\n\n");
        }
        format!("{}\n\n{}", self.description, segments.join("\n\n"))
    }
}

/// An agent binds one adapter to a description, instructions and an optional schema
pub struct Agent {
    profile: Arc<AgentProfile>,
    adapter: Box<dyn Adapter>,
}

impl Agent {
    /// Create a new Agent with the specified adapter
    pub fn new(mut adapter: Box<dyn Adapter>) -> Self {
        let profile = Arc::new(AgentProfile::default());
        adapter.set_agent(Arc::downgrade(&profile));
        Self { profile, adapter }
    }

    /// Replace the profile and point the adapter at the new one
    fn update<F: FnOnce(&mut AgentProfile)>(&mut self, change: F) {
        let mut next = (*self.profile).clone();
        change(&mut next);
        self.profile = Arc::new(next);
        self.adapter.set_agent(Arc::downgrade(&self.profile));
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.set_description(description);
        self
    }

    pub fn set_description<S: Into<String>>(&mut self, description: S) -> &mut Self {
        let description = description.into();
        self.update(|profile| profile.description = description);
        self
    }

    pub fn with_instruction<N: Into<String>, C: Into<Instruction>>(
        mut self,
        name: N,
        content: C,
    ) -> Self {
        self.add_instruction(name, content);
        self
    }

    /// Add or replace a named instruction; new names go last
    pub fn add_instruction<N: Into<String>, C: Into<Instruction>>(
        &mut self,
        name: N,
        content: C,
    ) -> &mut Self {
        let (name, content) = (name.into(), content.into());
        self.update(|profile| {
            profile.instructions.insert(name, content);
        });
        self
    }

    pub fn set_instructions<I, N, C>(&mut self, instructions: I) -> &mut Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Instruction>,
    {
        let instructions: IndexMap<String, Instruction> = instructions
            .into_iter()
            .map(|(name, content)| (name.into(), content.into()))
            .collect();
        self.update(|profile| profile.instructions = instructions);
        self
    }

    /// Attach a schema. Fails immediately when the adapter has no structured output.
    pub fn set_schema(&mut self, schema: Schema) -> AgentResult<&mut Self> {
        if !self.adapter.is_schema_supported() {
            return Err(AgentError::SchemaNotSupported(
                self.adapter.name().to_string(),
            ));
        }
        self.update(|profile| profile.schema = Some(schema));
        Ok(self)
    }

    pub fn with_schema(mut self, schema: Schema) -> AgentResult<Self> {
        self.set_schema(schema)?;
        Ok(self)
    }

    pub fn clear_schema(&mut self) -> &mut Self {
        self.update(|profile| profile.schema = None);
        self
    }

    pub fn description(&self) -> &str {
        self.profile.description()
    }

    pub fn instructions(&self) -> &IndexMap<String, Instruction> {
        self.profile.instructions()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.profile.schema()
    }

    pub fn profile(&self) -> &Arc<AgentProfile> {
        &self.profile
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn adapter_mut(&mut self) -> &mut dyn Adapter {
        self.adapter.as_mut()
    }

    /// Send `messages` through the adapter
    pub async fn send(
        &mut self,
        messages: &[Message],
        listener: Option<&mut Listener<'_>>,
    ) -> AgentResult<Message> {
        self.adapter.send(messages, listener).await
    }

    pub async fn embed(&self, text: &str) -> AgentResult<Embedding> {
        if !self.adapter.supports_embeddings() {
            return Err(AgentError::EmbeddingsNotSupported(
                self.adapter.name().to_string(),
            ));
        }
        self.adapter.embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{Property, PropertyType, SchemaObject};
    use crate::providers::deepseek::DeepseekAdapter;
    use crate::providers::mock::MockAdapter;
    use crate::providers::ollama::OllamaAdapter;

    fn schema() -> Schema {
        let object = SchemaObject::new()
            .with_property("summary", Property::new(PropertyType::String, "Summary"));
        Schema::new("review", "Code review", object, ["summary"])
    }

    #[test]
    fn test_new_agent_is_attached_to_adapter() {
        let agent = Agent::new(Box::new(MockAdapter::new(vec![])));
        assert_eq!(agent.description(), "");
        assert!(agent.instructions().is_empty());
        assert!(agent.schema().is_none());

        let attached = agent.adapter().agent().expect("adapter should see its agent");
        assert!(Arc::ptr_eq(&attached, agent.profile()));
    }

    #[test]
    fn test_updates_are_visible_to_adapter() {
        let mut agent = Agent::new(Box::new(MockAdapter::new(vec![])))
            .with_description("Reviewer")
            .with_instruction("Tone", "Be brief");
        agent.add_instruction("Rules", vec!["No jokes", "No emoji"]);

        let seen = agent.adapter().agent().unwrap();
        assert_eq!(seen.description(), "Reviewer");
        assert_eq!(
            seen.system_prompt(),
            "Reviewer\n\n# Tone\n\nBe brief\n\n# Rules\n\nNo jokes\nNo emoji"
        );
    }

    #[test]
    fn test_set_instructions_replaces_in_order() {
        let mut agent = Agent::new(Box::new(MockAdapter::new(vec![])));
        agent.add_instruction("Old", "gone");
        agent.set_instructions([("B", "second"), ("A", "first")]);

        let names: Vec<&str> = agent.instructions().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_system_prompt_without_instructions() {
        assert_eq!(AgentProfile::new("Only me").system_prompt(), "Only me");
        assert_eq!(
            AgentProfile::default()
                .with_instruction("Task", "Do it")
                .system_prompt(),
            "# Task\n\nDo it"
        );
    }

    #[test]
    fn test_schema_rejected_for_unsupported_adapter() -> anyhow::Result<()> {
        let adapter = DeepseekAdapter::new("key")?;
        let mut agent = Agent::new(Box::new(adapter));

        let err = agent.set_schema(schema()).err().expect("schema should be rejected");
        assert!(matches!(err, AgentError::SchemaNotSupported(name) if name == "deepseek"));
        assert!(agent.schema().is_none());
        Ok(())
    }

    #[test]
    fn test_schema_accepted_and_cleared() {
        let mut agent = Agent::new(Box::new(MockAdapter::new(vec![]).with_schema_support()))
            .with_schema(schema())
            .unwrap();
        assert_eq!(agent.schema().map(Schema::name), Some("review"));
        assert!(agent.adapter().agent().unwrap().schema().is_some());

        agent.clear_schema();
        assert!(agent.schema().is_none());
    }

    #[tokio::test]
    async fn test_embed_fails_fast_without_support() {
        let agent = Agent::new(Box::new(MockAdapter::new(vec![])));
        let err = agent.embed("text").await.unwrap_err();
        assert!(matches!(err, AgentError::EmbeddingsNotSupported(_)));
    }

    #[test]
    fn test_embedding_adapter_is_not_schema_capable() -> anyhow::Result<()> {
        let mut agent = Agent::new(Box::new(OllamaAdapter::new()?));
        assert!(agent.adapter().supports_embeddings());
        assert!(agent.set_schema(schema()).is_err());
        Ok(())
    }
}
