mod error;
mod rest;
mod sqlite;
mod types;

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
pub use error::StoreError;
pub use rest::RestStore;
pub use sqlite::SqliteStore;
use std::sync::Arc;
pub use types::{
    Conversation, ConversationId, ConversationPatch, MessageId, NewMessage, StoredMessage,
};

/// CRUD over the `conversations` and `messages` collections.
///
/// No call spans more than one collection, so there is no transaction between
/// a message insert and the preview update that usually follows it.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError>;

    /// Newest conversation first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StoreError>;

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Oldest message first.
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError>;

    /// Returns the number of deleted messages.
    async fn delete_messages(&self, conversation_id: &ConversationId) -> Result<u64, StoreError>;
}

pub async fn create_store(config: &Config) -> Result<Arc<dyn ConversationStore>> {
    match config.storage.provider.as_str() {
        "rest" => {
            let url = config
                .storage
                .url
                .as_deref()
                .context("storage.url is required for the rest provider")?;
            let key = config.storage.key.as_deref().unwrap_or_default();
            Ok(Arc::new(RestStore::new(url, key)))
        }
        _ => {
            let store = SqliteStore::new(&config.storage.data_dir)
                .await
                .context("Failed to open conversation database")?;
            Ok(store as Arc<dyn ConversationStore>)
        }
    }
}
