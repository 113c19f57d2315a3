use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The side of the exchange a message comes from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RoleKind {
    User,
    Assistant,
}

/// A participant in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    id: String,
    name: String,
    kind: RoleKind,
}

impl Role {
    pub fn new<I: Into<String>, N: Into<String>>(kind: RoleKind, id: I, name: N) -> Self {
        Role {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn user<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self::new(RoleKind::User, id, name)
    }

    pub fn assistant<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self::new(RoleKind::Assistant, id, name)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<N: Into<String>>(&mut self, name: N) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    /// The role tag carried by messages: `"user"` or `"assistant"`
    pub fn identifier(&self) -> &'static str {
        match self.kind {
            RoleKind::User => "user",
            RoleKind::Assistant => "assistant",
        }
    }
}
