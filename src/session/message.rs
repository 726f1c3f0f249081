use crate::generation::AttachmentRef;
use crate::store::{ConversationId, MessageId, StoredMessage};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Client-side identity of a message, assigned on construction and stable for
/// the lifetime of the session whether or not the store has saved it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub local_id: LocalId,
    /// Durable id; `None` until the store has saved the message.
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub text: String,
    pub is_bot: bool,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(
        conversation_id: ConversationId,
        text: &str,
        attachment: Option<AttachmentRef>,
    ) -> Self {
        Self {
            local_id: LocalId::new(),
            id: None,
            conversation_id,
            text: text.to_string(),
            is_bot: false,
            attachment,
            created_at: Utc::now(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Adopts the durable identity assigned by the store.
    pub fn reconcile(&mut self, stored: &StoredMessage) {
        self.id = Some(stored.id.clone());
        self.created_at = stored.created_at;
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Self {
            local_id: LocalId::new(),
            id: Some(stored.id),
            conversation_id: stored.conversation_id,
            text: stored.content,
            is_bot: stored.is_bot,
            attachment: None,
            created_at: stored.created_at,
        }
    }
}
