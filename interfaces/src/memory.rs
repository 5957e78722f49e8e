use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::defs::{
    CacheTokens, ContentEdit, ContentItem, Creator, NewContentItem, NewCreator, NewSource,
    ProcessedMessage, Source, SourceType, SyncStatus,
};
use crate::state::{ContentStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    sources: HashMap<Uuid, Source>,
    creators: HashMap<Uuid, Creator>,
    content: HashMap<Uuid, ContentItem>,
    processed: HashMap<String, ProcessedMessage>,
}

/// A `ContentStore` held entirely in memory. Used by tests and by the CLI when
/// no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn content_items(&self) -> Vec<ContentItem> {
        let tables = self.tables.read().await;
        let mut items: Vec<ContentItem> = tables.content.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.external_id.cmp(&b.external_id)));
        items
    }

    pub async fn creators(&self) -> Vec<Creator> {
        self.tables.read().await.creators.values().cloned().collect()
    }

    pub async fn processed_message_count(&self) -> usize {
        self.tables.read().await.processed.len()
    }
}

fn not_found(entity: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { entity, id: id.to_string() }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        Ok(self.tables.read().await.sources.get(&id).cloned())
    }

    async fn list_active_sources(&self, user_id: &str) -> StoreResult<Vec<Source>> {
        let tables = self.tables.read().await;
        let mut sources: Vec<Source> = tables
            .sources
            .values()
            .filter(|s| s.is_active && s.user_id == user_id)
            .cloned()
            .collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn find_active_source_by_feed_url(&self, user_id: &str, feed_url: &str) -> StoreResult<Option<Source>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sources
            .values()
            .find(|s| s.is_active && s.user_id == user_id && s.feed_url == feed_url)
            .cloned())
    }

    async fn create_source(&self, source: NewSource) -> StoreResult<Source> {
        let created = Source {
            id: Uuid::new_v4(),
            user_id: source.user_id,
            source_type: source.source_type,
            site_url: source.site_url,
            feed_url: source.feed_url,
            feed_type: source.feed_type,
            discovery_method: source.discovery_method,
            title: source.title,
            description: source.description,
            cache: CacheTokens::default(),
            last_sync_status: None,
            last_error: None,
            last_synced_at: None,
            is_active: true,
            created_at: Utc::now(),
        };
        self.tables.write().await.sources.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_sync_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let source = tables.sources.get_mut(&id).ok_or_else(|| not_found("source", id))?;
        source.last_sync_status = Some(status);
        source.last_error = error.map(str::to_string);
        if synced_at.is_some() {
            source.last_synced_at = synced_at;
        }
        Ok(())
    }

    async fn update_cache_tokens(&self, id: Uuid, tokens: &CacheTokens) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let source = tables.sources.get_mut(&id).ok_or_else(|| not_found("source", id))?;
        source.cache = tokens.clone();
        Ok(())
    }

    async fn deactivate_source(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let source = tables.sources.get_mut(&id).ok_or_else(|| not_found("source", id))?;
        source.is_active = false;
        Ok(())
    }

    async fn upsert_creator(&self, creator: NewCreator) -> StoreResult<Uuid> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        if let Some(existing) = tables
            .creators
            .values_mut()
            .find(|c| c.source_type == creator.source_type && c.external_id == creator.external_id)
        {
            existing.name = creator.name;
            if creator.description.is_some() {
                existing.description = creator.description;
            }
            if creator.profile_url.is_some() {
                existing.profile_url = creator.profile_url;
            }
            if !creator.metadata.is_null() {
                existing.metadata = creator.metadata;
            }
            existing.updated_at = now;
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        tables.creators.insert(
            id,
            Creator {
                id,
                source_type: creator.source_type,
                external_id: creator.external_id,
                name: creator.name,
                description: creator.description,
                profile_url: creator.profile_url,
                metadata: creator.metadata,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_creator(&self, id: Uuid) -> StoreResult<Option<Creator>> {
        Ok(self.tables.read().await.creators.get(&id).cloned())
    }

    async fn find_content_by_hash(&self, source_type: SourceType, hash: &str) -> StoreResult<Option<ContentItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .content
            .values()
            .find(|c| c.source_type == source_type && c.content_hash == hash)
            .cloned())
    }

    async fn find_content_by_external_id(
        &self,
        source_type: SourceType,
        external_id: &str,
    ) -> StoreResult<Option<ContentItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .content
            .values()
            .find(|c| c.source_type == source_type && c.external_id == external_id)
            .cloned())
    }

    async fn insert_content(&self, item: NewContentItem) -> StoreResult<ContentItem> {
        let mut tables = self.tables.write().await;
        let clash = tables.content.values().any(|c| {
            c.source_type == item.source_type
                && (c.content_hash == item.content_hash || c.external_id == item.external_id)
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "content {} ({}) already stored",
                item.external_id, item.content_hash
            )));
        }
        if !tables.creators.contains_key(&item.creator_id) {
            return Err(not_found("creator", item.creator_id));
        }

        let now = Utc::now();
        let stored = ContentItem {
            id: Uuid::new_v4(),
            creator_id: item.creator_id,
            source_type: item.source_type,
            external_id: item.external_id,
            title: item.title,
            description: item.description,
            url: item.url,
            author: item.author,
            body: item.body,
            published_at: item.published_at,
            content_hash: item.content_hash,
            edited: false,
            created_at: now,
            updated_at: now,
        };
        tables.content.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_content(&self, id: Uuid, edit: ContentEdit) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let source_type = tables.content.get(&id).ok_or_else(|| not_found("content", id))?.source_type;
        let clash = tables
            .content
            .values()
            .any(|c| c.id != id && c.source_type == source_type && c.content_hash == edit.content_hash);
        if clash {
            return Err(StoreError::Conflict(format!("hash {} already stored", edit.content_hash)));
        }
        let item = tables.content.get_mut(&id).ok_or_else(|| not_found("content", id))?;
        item.title = edit.title;
        item.description = edit.description;
        item.body = edit.body;
        item.content_hash = edit.content_hash;
        item.edited = true;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn is_message_processed(&self, message_id: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.processed.contains_key(message_id))
    }

    async fn record_processed_message(
        &self,
        message_id: &str,
        content_hash: Option<&str>,
        content_id: Option<Uuid>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .processed
            .entry(message_id.to_string())
            .or_insert_with(|| ProcessedMessage {
                message_id: message_id.to_string(),
                content_hash: content_hash.map(str::to_string),
                content_id,
                processed_at: Utc::now(),
            });
        Ok(())
    }

    async fn get_processed_message(&self, message_id: &str) -> StoreResult<Option<ProcessedMessage>> {
        Ok(self.tables.read().await.processed.get(message_id).cloned())
    }

    async fn count_content(&self, source_type: SourceType) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables.content.values().filter(|c| c.source_type == source_type).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{DiscoveryMethod, FeedType};

    fn new_feed_source(user: &str, url: &str) -> NewSource {
        NewSource {
            user_id: user.to_string(),
            source_type: SourceType::Feed,
            site_url: "https://example.com".to_string(),
            feed_url: url.to_string(),
            feed_type: Some(FeedType::Rss),
            discovery_method: DiscoveryMethod::WellKnownPath,
            title: None,
            description: None,
        }
    }

    fn new_creator(external_id: &str, name: &str) -> NewCreator {
        NewCreator {
            source_type: SourceType::Feed,
            external_id: external_id.to_string(),
            name: name.to_string(),
            description: None,
            profile_url: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn creator_upsert_keeps_one_row_per_identity() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let first = store.upsert_creator(new_creator("https://a.com/feed", "A")).await.unwrap();
            let second = store.upsert_creator(new_creator("https://a.com/feed", "A renamed")).await.unwrap();
            assert_eq!(first, second);
            let creators = store.creators().await;
            assert_eq!(creators.len(), 1);
            assert_eq!(creators[0].name, "A renamed");
        });
    }

    #[test]
    fn deactivated_sources_are_not_listed() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let a = store.create_source(new_feed_source("u1", "https://a.com/feed.xml")).await.unwrap();
            store.create_source(new_feed_source("u1", "https://b.com/feed.xml")).await.unwrap();
            store.create_source(new_feed_source("u2", "https://c.com/feed.xml")).await.unwrap();

            store.deactivate_source(a.id).await.unwrap();

            let active = store.list_active_sources("u1").await.unwrap();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].feed_url, "https://b.com/feed.xml");
            assert!(store.get_source(a.id).await.unwrap().is_some());
        });
    }

    #[test]
    fn ledger_rows_are_written_once() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.record_processed_message("m1", Some("h1"), None).await.unwrap();
            store.record_processed_message("m1", Some("h2"), None).await.unwrap();
            assert_eq!(store.processed_message_count().await, 1);
            let row = store.get_processed_message("m1").await.unwrap().unwrap();
            assert_eq!(row.content_hash.as_deref(), Some("h1"));
        });
    }

    #[test]
    fn duplicate_hash_insert_is_a_conflict() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let creator_id = store.upsert_creator(new_creator("https://a.com/feed", "A")).await.unwrap();
            let item = NewContentItem {
                creator_id,
                source_type: SourceType::Feed,
                external_id: "guid-1".to_string(),
                title: "One".to_string(),
                description: None,
                url: "https://a.com/1".to_string(),
                author: None,
                body: None,
                published_at: Utc::now(),
                content_hash: "abcd".to_string(),
            };
            store.insert_content(item.clone()).await.unwrap();
            let err = store.insert_content(item).await.unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
        });
    }

    #[test]
    fn edit_onto_a_stored_hash_is_a_conflict() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let creator_id = store.upsert_creator(new_creator("https://a.com/feed", "A")).await.unwrap();
            let item = |guid: &str, hash: &str| NewContentItem {
                creator_id,
                source_type: SourceType::Feed,
                external_id: guid.to_string(),
                title: guid.to_string(),
                description: None,
                url: format!("https://a.com/{}", guid),
                author: None,
                body: None,
                published_at: Utc::now(),
                content_hash: hash.to_string(),
            };
            let first = store.insert_content(item("one", "h1")).await.unwrap();
            store.insert_content(item("two", "h2")).await.unwrap();

            let edit = |hash: &str| ContentEdit {
                title: "one".to_string(),
                description: None,
                body: Some("edited".to_string()),
                content_hash: hash.to_string(),
            };
            let err = store.update_content(first.id, edit("h2")).await.unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));

            store.update_content(first.id, edit("h1")).await.unwrap();
            store.update_content(first.id, edit("h3")).await.unwrap();
        });
    }
}
