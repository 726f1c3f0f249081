use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub is_bot: bool,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
