use serde::{Deserialize, Serialize};

use super::role::RoleKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
/// Content carried by a message
pub enum MessageContent {
    Text(String),
    /// Raw image bytes; the MIME type is sniffed when needed
    Image(Vec<u8>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&[u8]> {
        match self {
            MessageContent::Image(bytes) => Some(bytes),
            MessageContent::Text(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Image(bytes) => bytes.is_empty(),
        }
    }

    /// Short label used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::Text(_) => "text",
            MessageContent::Image(_) => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
///
/// Content is fixed at construction. Attaching a role produces a new message.
pub struct Message {
    role: Option<RoleKind>,
    content: MessageContent,
}

impl Message {
    /// A text message with no role yet
    pub fn text<S: Into<String>>(content: S) -> Self {
        Message {
            role: None,
            content: MessageContent::Text(content.into()),
        }
    }

    /// An image message with no role yet
    pub fn image<B: Into<Vec<u8>>>(content: B) -> Self {
        Message {
            role: None,
            content: MessageContent::Image(content.into()),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::text(content).with_role(RoleKind::User)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::text(content).with_role(RoleKind::Assistant)
    }

    pub fn with_role(self, role: RoleKind) -> Self {
        Message {
            role: Some(role),
            content: self.content,
        }
    }

    pub fn role(&self) -> Option<RoleKind> {
        self.role
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Text content, or `None` for images
    pub fn as_text(&self) -> Option<&str> {
        self.content.as_text()
    }

    /// MIME type of image content, sniffed from its magic bytes.
    ///
    /// Returns `None` for text messages, empty content, or unrecognized bytes.
    pub fn mime_type(&self) -> Option<String> {
        let bytes = self.content.as_image()?;
        if bytes.is_empty() {
            return None;
        }
        infer::get(bytes).map(|kind| kind.mime_type().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    const PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVQYV2NgYAAAAAMAAWgmWQ0AAAAASUVORK5CYII=";
    const GIF: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

    #[test]
    fn test_text_message_keeps_inputs() {
        let message = Message::text("Hello, AI!");
        assert_eq!(message.role(), None);
        assert_eq!(message.as_text(), Some("Hello, AI!"));

        let message = message.with_role(RoleKind::User);
        assert_eq!(message.role(), Some(RoleKind::User));
        assert_eq!(message.content(), &MessageContent::Text("Hello, AI!".into()));
    }

    #[test]
    fn test_role_shortcuts() {
        assert_eq!(Message::assistant("Hi").role(), Some(RoleKind::Assistant));
        assert!(Message::user("").content().is_empty());
    }

    #[test]
    fn test_image_mime_types() {
        let png = Message::image(STANDARD.decode(PNG).unwrap());
        assert_eq!(png.mime_type().as_deref(), Some("image/png"));

        let gif = Message::image(STANDARD.decode(GIF).unwrap());
        assert_eq!(gif.mime_type().as_deref(), Some("image/gif"));

        let jpeg = Message::image(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F']);
        assert_eq!(jpeg.mime_type().as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_image_without_recognizable_content() {
        let empty = Message::image(Vec::new());
        assert_eq!(empty.content().as_image(), Some(&[][..]));
        assert_eq!(empty.mime_type(), None);

        let garbage = Message::image(b"not an image".to_vec());
        assert_eq!(garbage.content().as_image(), Some(&b"not an image"[..]));
        assert_eq!(garbage.mime_type(), None);

        assert_eq!(Message::text("plain").mime_type(), None);
    }
}
