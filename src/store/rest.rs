use super::{
    Conversation, ConversationId, ConversationPatch, ConversationStore, MessageId, NewMessage,
    StoreError, StoredMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

/// Store backed by a hosted PostgREST endpoint (`{url}/rest/v1/{table}`).
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: String,
    title: Option<String>,
    last_message: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    conversation_id: String,
    content: String,
    is_bot: bool,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ConversationInsert<'a> {
    title: Option<&'a str>,
}

#[derive(Serialize)]
struct ConversationUpdate<'a> {
    last_message: &'a str,
}

#[derive(Serialize)]
struct MessageInsert<'a> {
    conversation_id: &'a str,
    content: &'a str,
    is_bot: bool,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        info!("Using hosted conversation store at {}", base_url);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Every request asks the backend to echo the affected rows.
    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
    }

    fn by_id(&self, method: Method, table: &str, id: &str) -> RequestBuilder {
        self.request(method, table).query(&[("id", eq(id))])
    }

    fn list_messages_request(&self, conversation_id: &ConversationId) -> RequestBuilder {
        self.request(Method::GET, MESSAGES).query(&[
            ("select", "*".to_string()),
            ("conversation_id", eq(conversation_id.as_str())),
            ("order", "created_at.asc".to_string()),
        ])
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Vec<T>, StoreError> {
        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| StoreError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ConversationStore for RestStore {
    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError> {
        let rows: Vec<ConversationRow> = self
            .fetch_rows(
                self.request(Method::POST, CONVERSATIONS)
                    .json(&ConversationInsert { title }),
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no conversation".into()))?;
        info!("Created conversation {}", row.id);
        Ok(row.into())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let rows: Vec<ConversationRow> = self
            .fetch_rows(
                self.request(Method::GET, CONVERSATIONS)
                    .query(&[("select", "*"), ("order", "created_at.desc")]),
            )
            .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StoreError> {
        let Some(last_message) = patch.last_message else {
            return Ok(());
        };

        let rows: Vec<ConversationRow> = self
            .fetch_rows(
                self.by_id(Method::PATCH, CONVERSATIONS, id.as_str())
                    .json(&ConversationUpdate {
                        last_message: &last_message,
                    }),
            )
            .await?;

        if rows.is_empty() {
            return Err(StoreError::not_found("conversation", id));
        }
        Ok(())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let rows: Vec<ConversationRow> = self
            .fetch_rows(self.by_id(Method::DELETE, CONVERSATIONS, id.as_str()))
            .await?;

        if rows.is_empty() {
            return Err(StoreError::not_found("conversation", id));
        }
        info!("Deleted conversation {}", id);
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let rows: Vec<MessageRow> = self
            .fetch_rows(self.request(Method::POST, MESSAGES).json(&MessageInsert {
                conversation_id: message.conversation_id.as_str(),
                content: &message.content,
                is_bot: message.is_bot,
            }))
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no message".into()))?;
        debug!("Saved message {} in conversation {}", row.id, row.conversation_id);
        Ok(row.into())
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<MessageRow> = self
            .fetch_rows(self.list_messages_request(conversation_id))
            .await?;

        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        let rows: Vec<MessageRow> = self
            .fetch_rows(self.by_id(Method::DELETE, MESSAGES, id.as_str()))
            .await?;

        if rows.is_empty() {
            return Err(StoreError::not_found("message", id));
        }
        Ok(())
    }

    async fn delete_messages(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        let rows: Vec<MessageRow> = self
            .fetch_rows(
                self.request(Method::DELETE, MESSAGES)
                    .query(&[("conversation_id", eq(conversation_id.as_str()))]),
            )
            .await?;

        Ok(rows.len() as u64)
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl From<ConversationRow> for Conversation {
    fn from(r: ConversationRow) -> Self {
        Self {
            id: r.id.into(),
            title: r.title,
            last_message: r.last_message,
            created_at: r.created_at,
        }
    }
}

impl From<MessageRow> for StoredMessage {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id.into(),
            conversation_id: r.conversation_id.into(),
            content: r.content,
            is_bot: r.is_bot,
            created_at: r.created_at,
        }
    }
}
