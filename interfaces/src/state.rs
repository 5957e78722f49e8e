use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::defs::{
    CacheTokens, ContentEdit, ContentItem, Creator, NewContentItem, NewCreator, NewSource,
    ProcessedMessage, Source, SourceType, SyncStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The repository the ingestion pipeline talks to. Nothing in the pipeline
/// touches storage except through this trait.
///
/// Implementations are expected to enforce uniqueness of
/// `(source_type, content_hash)` and `(source_type, external_id)` for content,
/// `(source_type, external_id)` for creators and `message_id` for the ledger;
/// concurrent cycles rely on that rather than on locks in the caller.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>>;

    async fn list_active_sources(&self, user_id: &str) -> StoreResult<Vec<Source>>;

    async fn find_active_source_by_feed_url(&self, user_id: &str, feed_url: &str) -> StoreResult<Option<Source>>;

    async fn create_source(&self, source: NewSource) -> StoreResult<Source>;

    /// Records the outcome of a cycle. `synced_at` is stamped on success only.
    async fn update_sync_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    async fn update_cache_tokens(&self, id: Uuid, tokens: &CacheTokens) -> StoreResult<()>;

    async fn deactivate_source(&self, id: Uuid) -> StoreResult<()>;

    /// Inserts or refreshes the creator keyed by `(source_type, external_id)`.
    async fn upsert_creator(&self, creator: NewCreator) -> StoreResult<Uuid>;

    async fn get_creator(&self, id: Uuid) -> StoreResult<Option<Creator>>;

    async fn find_content_by_hash(&self, source_type: SourceType, hash: &str) -> StoreResult<Option<ContentItem>>;

    async fn find_content_by_external_id(
        &self,
        source_type: SourceType,
        external_id: &str,
    ) -> StoreResult<Option<ContentItem>>;

    async fn insert_content(&self, item: NewContentItem) -> StoreResult<ContentItem>;

    async fn update_content(&self, id: Uuid, edit: ContentEdit) -> StoreResult<()>;

    async fn is_message_processed(&self, message_id: &str) -> StoreResult<bool>;

    /// Writes the ledger row once. A second call for the same message is a no-op.
    async fn record_processed_message(
        &self,
        message_id: &str,
        content_hash: Option<&str>,
        content_id: Option<Uuid>,
    ) -> StoreResult<()>;

    async fn get_processed_message(&self, message_id: &str) -> StoreResult<Option<ProcessedMessage>>;

    async fn count_content(&self, source_type: SourceType) -> StoreResult<usize>;
}
