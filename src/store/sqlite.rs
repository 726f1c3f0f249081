use super::{
    Conversation, ConversationId, ConversationPatch, ConversationStore, MessageId, NewMessage,
    StoreError, StoredMessage,
};
use crate::entity::{conversations, messages};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const DB_FILE: &str = "conversations.db";

pub struct SqliteStore {
    db_url: String,
}

impl SqliteStore {
    pub async fn new(data_dir: &Path) -> Result<Arc<Self>, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<(), StoreError> {
                let db = Database::connect(&db_url)?;

                db.get_schema_builder()
                    .register(conversations::Entity)
                    .register(messages::Entity)
                    .apply(&db)?;

                Ok(())
            }
        })
        .await??;

        info!("Conversation store ready ({})", db_path.display());
        Ok(Arc::new(Self { db_url }))
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DatabaseConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_url = self.db_url.clone();

        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let db = Database::connect(&db_url)?;
            op(&db)
        })
        .await?
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let title = title.map(str::to_string);
        let now = Utc::now().timestamp_micros();

        let record = conversations::ActiveModel {
            rowid: NotSet,
            id: Set(id.clone()),
            title: Set(title.clone()),
            last_message: Set(None),
            created_at_us: Set(now),
        };

        self.run(move |db| {
            conversations::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        info!("Created conversation {}", id);
        Ok(Conversation {
            id: id.into(),
            title,
            last_message: None,
            created_at: timestamp_from_micros(now),
        })
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        self.run(|db| {
            let rows = conversations::Entity::find()
                .order_by_desc(conversations::Column::CreatedAtUs)
                .order_by_desc(conversations::Column::Rowid)
                .all(db)?;

            Ok(rows.into_iter().map(Conversation::from).collect())
        })
        .await
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StoreError> {
        let Some(last_message) = patch.last_message else {
            return Ok(());
        };
        let id = id.to_string();

        self.run(move |db| {
            let result = conversations::Entity::update_many()
                .col_expr(conversations::Column::LastMessage, Expr::value(last_message))
                .filter(conversations::Column::Id.eq(id.clone()))
                .exec(db)?;

            if result.rows_affected == 0 {
                return Err(StoreError::not_found("conversation", id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let id = id.to_string();

        self.run(move |db| {
            let result = conversations::Entity::delete_many()
                .filter(conversations::Column::Id.eq(id.clone()))
                .exec(db)?;

            if result.rows_affected == 0 {
                return Err(StoreError::not_found("conversation", id));
            }
            info!("Deleted conversation {}", id);
            Ok(())
        })
        .await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_micros();

        let record = messages::ActiveModel {
            rowid: NotSet,
            id: Set(id.clone()),
            conversation_id: Set(message.conversation_id.to_string()),
            content: Set(message.content.clone()),
            is_bot: Set(message.is_bot),
            created_at_us: Set(now),
        };

        self.run(move |db| {
            messages::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        debug!(
            "Saved {} message {} in conversation {}",
            if message.is_bot { "bot" } else { "user" },
            id,
            message.conversation_id
        );
        Ok(StoredMessage {
            id: id.into(),
            conversation_id: message.conversation_id,
            content: message.content,
            is_bot: message.is_bot,
            created_at: timestamp_from_micros(now),
        })
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conversation_id = conversation_id.to_string();

        self.run(move |db| {
            let rows = messages::Entity::find()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .order_by_asc(messages::Column::CreatedAtUs)
                .order_by_asc(messages::Column::Rowid)
                .all(db)?;

            Ok(rows.into_iter().map(StoredMessage::from).collect())
        })
        .await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        let id = id.to_string();

        self.run(move |db| {
            let result = messages::Entity::delete_many()
                .filter(messages::Column::Id.eq(id.clone()))
                .exec(db)?;

            if result.rows_affected == 0 {
                return Err(StoreError::not_found("message", id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_messages(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        let conversation_id = conversation_id.to_string();

        self.run(move |db| {
            let result = messages::Entity::delete_many()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .exec(db)?;
            Ok(result.rows_affected)
        })
        .await
    }
}

fn timestamp_from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

impl From<conversations::Model> for Conversation {
    fn from(r: conversations::Model) -> Self {
        Self {
            id: r.id.into(),
            title: r.title,
            last_message: r.last_message,
            created_at: timestamp_from_micros(r.created_at_us),
        }
    }
}

impl From<messages::Model> for StoredMessage {
    fn from(r: messages::Model) -> Self {
        Self {
            id: r.id.into(),
            conversation_id: r.conversation_id.into(),
            content: r.content,
            is_bot: r.is_bot,
            created_at: timestamp_from_micros(r.created_at_us),
        }
    }
}
