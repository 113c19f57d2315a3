use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

use crate::agent::AgentProfile;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::models::role::RoleKind;

/// Used when the bytes of an image match no known signature
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Every message must carry a role and non-empty content before dispatch
pub fn validate_messages(messages: &[Message]) -> AgentResult<()> {
    for message in messages {
        if message.role().is_none() || message.content().is_empty() {
            return Err(AgentError::MalformedMessage);
        }
    }
    Ok(())
}

/// Role of a validated message, `user` when absent
pub fn role_of(message: &Message) -> RoleKind {
    message.role().unwrap_or(RoleKind::User)
}

/// Text segments of the system context: the description first, then each
/// instruction. Empty segments are dropped.
pub fn system_segments(profile: &AgentProfile) -> Vec<String> {
    let mut segments = Vec::new();
    if !profile.description().is_empty() {
        segments.push(profile.description().to_string());
    }
    segments.extend(profile.instruction_segments());
    segments
}

/// MIME type and base64 payload of an image message
pub fn encode_image(message: &Message) -> Option<(String, String)> {
    let MessageContent::Image(bytes) = message.content() else {
        return None;
    };
    let mime_type = message
        .mime_type()
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());
    Some((mime_type, STANDARD.encode(bytes)))
}

/// `data:` URL for an image message
pub fn image_data_url(message: &Message) -> Option<String> {
    encode_image(message).map(|(mime_type, data)| format!("data:{};base64,{}", mime_type, data))
}

/// The `error` member of a payload, looking inside arrays as Gemini wraps errors in one
pub fn error_field(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => map.get("error").filter(|error| !error.is_null()),
        Value::Array(items) => items.iter().find_map(error_field),
        _ => None,
    }
}

fn format_error(code: Option<String>, message: Option<&str>) -> String {
    format!(
        "({}) {}",
        code.unwrap_or_else(|| "unknown_error".to_string()),
        message.unwrap_or("Unknown error")
    )
}

fn string_error(error: &Value, code: &str) -> Option<String> {
    error
        .as_str()
        .map(|message| format_error(Some(code.to_string()), Some(message)))
}

/// `(error.type) error.message`
pub fn anthropic_error(value: &Value) -> Option<String> {
    let error = error_field(value)?;
    if let Some(text) = string_error(error, "unknown_error") {
        return Some(text);
    }
    let code = error.get("type").and_then(Value::as_str).map(String::from);
    Some(format_error(code, error.get("message").and_then(Value::as_str)))
}

/// `(error.code or error.type) error.message`
pub fn openai_error(value: &Value) -> Option<String> {
    let error = error_field(value)?;
    if let Some(text) = string_error(error, "unknown_error") {
        return Some(text);
    }
    let code = error
        .get("code")
        .and_then(code_text)
        .or_else(|| error.get("type").and_then(code_text));
    Some(format_error(code, error.get("message").and_then(Value::as_str)))
}

/// `(error.status or error.code) error.message`
pub fn gemini_error(value: &Value) -> Option<String> {
    let error = error_field(value)?;
    if let Some(text) = string_error(error, "unknown_error") {
        return Some(text);
    }
    let code = error
        .get("status")
        .and_then(code_text)
        .or_else(|| error.get("code").and_then(code_text));
    Some(format_error(code, error.get("message").and_then(Value::as_str)))
}

/// Ollama reports `{"error": "..."}`
pub fn ollama_error(value: &Value) -> Option<String> {
    let error = error_field(value)?;
    if let Some(text) = string_error(error, "ollama_error") {
        return Some(text);
    }
    Some(format_error(
        Some("ollama_error".to_string()),
        error.get("message").and_then(Value::as_str),
    ))
}

/// Used when a failed response carries no recognizable error envelope
pub fn unknown_error(raw: &str) -> String {
    let raw = raw.trim();
    format_error(None, (!raw.is_empty()).then_some(raw))
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Unsigned integer at a JSON pointer, zero when absent
pub fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_messages() {
        assert!(validate_messages(&[Message::user("hi"), Message::assistant("hello")]).is_ok());
        assert!(matches!(
            validate_messages(&[Message::text("no role")]),
            Err(AgentError::MalformedMessage)
        ));
        assert!(matches!(
            validate_messages(&[Message::user("")]),
            Err(AgentError::MalformedMessage)
        ));
    }

    #[test]
    fn test_system_segments_skip_empty_description() {
        let profile = AgentProfile::default().with_instruction("Rules", vec!["a", "b"]);
        assert_eq!(system_segments(&profile), vec!["# Rules\n\na\nb"]);

        let profile = AgentProfile::new("Helper").with_instruction("Tone", "Calm");
        assert_eq!(system_segments(&profile), vec!["Helper", "# Tone\n\nCalm"]);
    }

    #[test]
    fn test_image_encoding() {
        let gif = STANDARD
            .decode("R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7")
            .unwrap();
        let message = Message::image(gif.clone()).with_role(RoleKind::User);
        let (mime_type, data) = encode_image(&message).unwrap();
        assert_eq!(mime_type, "image/gif");
        assert_eq!(STANDARD.decode(data).unwrap(), gif);

        let unknown = Message::image(vec![1, 2, 3]);
        assert_eq!(
            image_data_url(&unknown).unwrap(),
            "data:application/octet-stream;base64,AQID"
        );
        assert!(encode_image(&Message::user("text")).is_none());
    }

    #[test]
    fn test_vendor_error_formats() {
        let anthropic = json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}});
        assert_eq!(anthropic_error(&anthropic).unwrap(), "(overloaded_error) Overloaded");

        let openai = json!({"error": {"message": "Bad key", "type": "invalid_request_error", "code": "invalid_api_key"}});
        assert_eq!(openai_error(&openai).unwrap(), "(invalid_api_key) Bad key");

        let openai_no_code = json!({"error": {"message": "Slow down", "type": "rate_limit", "code": null}});
        assert_eq!(openai_error(&openai_no_code).unwrap(), "(rate_limit) Slow down");

        let gemini = json!([{"error": {"code": 400, "message": "Bad request", "status": "INVALID_ARGUMENT"}}]);
        assert_eq!(gemini_error(&gemini).unwrap(), "(INVALID_ARGUMENT) Bad request");

        let gemini_numeric = json!({"error": {"code": 503, "message": "Unavailable"}});
        assert_eq!(gemini_error(&gemini_numeric).unwrap(), "(503) Unavailable");

        let ollama = json!({"error": "model \"nope\" not found"});
        assert_eq!(ollama_error(&ollama).unwrap(), "(ollama_error) model \"nope\" not found");

        assert!(openai_error(&json!({"choices": []})).is_none());
        assert!(openai_error(&json!({"error": null})).is_none());
    }

    #[test]
    fn test_unknown_error() {
        assert_eq!(unknown_error("  Bad gateway \n"), "(unknown_error) Bad gateway");
        assert_eq!(unknown_error(""), "(unknown_error) Unknown error");
    }

    #[test]
    fn test_u64_at() {
        let value = json!({"usage": {"prompt_tokens": 7}});
        assert_eq!(u64_at(&value, "/usage/prompt_tokens"), 7);
        assert_eq!(u64_at(&value, "/usage/missing"), 0);
    }
}
