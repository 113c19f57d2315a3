use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not set")]
    AgentNotSet,

    #[error("Schema is not supported by the {0} adapter")]
    SchemaNotSupported(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid message format: role and content are required")]
    MalformedMessage,

    #[error("{vendor} does not accept {kind} content")]
    UnsupportedContent { vendor: String, kind: String },

    #[error("Invalid property type for '{name}': {kind}")]
    InvalidPropertyType { name: String, kind: String },

    #[error("Embeddings are not supported by the {0} adapter")]
    EmbeddingsNotSupported(String),

    #[error("{0} adapter does not support chat or messages. Use embed() instead.")]
    ChatNotSupported(String),

    /// A vendor reported an error, either through a non-2xx status or in-band
    /// while streaming. `message` is always normalized to `(code) message`.
    #[error("{vendor} API error: {message}")]
    Vendor {
        vendor: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid response from {vendor}: {reason}")]
    InvalidResponse { vendor: String, reason: String },

    #[error("Listener failed: {0}")]
    Listener(anyhow::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl AgentError {
    pub fn vendor(vendor: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        AgentError::Vendor {
            vendor: capitalize(vendor),
            status,
            message: message.into(),
        }
    }

    /// HTTP status reported by the vendor, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AgentError::Vendor { status, .. } => *status,
            _ => None,
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_error_display_and_status() {
        let err = AgentError::vendor("anthropic", Some(529), "(overloaded_error) Overloaded");
        assert_eq!(
            err.to_string(),
            "Anthropic API error: (overloaded_error) Overloaded"
        );
        assert_eq!(err.status(), Some(529));
    }

    #[test]
    fn test_status_absent_for_configuration_errors() {
        assert_eq!(AgentError::AgentNotSet.status(), None);
        assert_eq!(
            AgentError::UnsupportedModel("gpt-0".into()).to_string(),
            "Unsupported model: gpt-0"
        );
    }
}
