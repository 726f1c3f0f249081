use chrono::{DateTime, Utc};
use std::fmt;

// Store-assigned identifiers are opaque strings; wrap them so conversation and
// message ids cannot be swapped by accident.
macro_rules! define_store_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_store_id!(ConversationId);
define_store_id!(MessageId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: Option<String>,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message as the store knows it: always carries its durable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub is_bot: bool,
}

/// Partial update of a conversation. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationPatch {
    pub last_message: Option<String>,
}

impl ConversationPatch {
    pub fn last_message(text: impl Into<String>) -> Self {
        Self {
            last_message: Some(text.into()),
        }
    }
}
