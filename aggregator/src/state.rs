use crate::types::Result;
use email_ingestion::{InboxExtractor, MailboxMessage, NewsletterPost};
use interfaces::{
    ApplyOutcome, ContentEdit, ContentStore, NewContentItem, NewCreator, NormalizedItem, SourceType, StoreError,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Who an item is attributed to when it turns out to be new.
#[derive(Debug, Clone)]
pub enum ItemCreator {
    /// Already upserted for this cycle.
    Known(Uuid),
    /// Upserted only if the item is inserted.
    Upsert(NewCreator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The ledger already has this message; nothing was evaluated.
    AlreadyProcessed,
    /// Not an extractable newsletter post. Still recorded in the ledger.
    Rejected,
    Applied(ApplyOutcome),
}

/// Dedup and upsert of normalized items against the store.
pub struct IngestState {
    store: Arc<dyn ContentStore>,
}

impl IngestState {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Hash hit first, then identity hit, then insert. Identity hits with a
    /// new hash are edits for feeds and duplicates for mailboxes.
    pub async fn apply(
        &self,
        source_type: SourceType,
        item: &NormalizedItem,
        creator: ItemCreator,
    ) -> Result<ApplyOutcome> {
        if let Some(existing) = self.store.find_content_by_hash(source_type, &item.content_hash).await? {
            if let ItemCreator::Known(creator_id) = &creator {
                if existing.creator_id != *creator_id {
                    debug!(
                        "{} matches content {} from another creator; keeping original attribution",
                        item.url, existing.id
                    );
                }
            }
            return Ok(ApplyOutcome::Duplicate(existing.id));
        }

        if let Some(existing) = self.store.find_content_by_external_id(source_type, &item.external_id).await? {
            if source_type == SourceType::Mailbox {
                return Ok(ApplyOutcome::Duplicate(existing.id));
            }
            let edit = self
                .store
                .update_content(
                    existing.id,
                    ContentEdit {
                        title: item.title.clone(),
                        description: item.description.clone(),
                        body: item.body.clone(),
                        content_hash: item.content_hash.clone(),
                    },
                )
                .await;
            return match edit {
                Ok(()) => {
                    info!("Updated edited item {} ({} -> {})", item.url, existing.content_hash, item.content_hash);
                    Ok(ApplyOutcome::Updated(existing.id))
                }
                // The new hash was stored by another cycle after our lookup.
                Err(StoreError::Conflict(reason)) => {
                    debug!("Edit raced for {}: {}", item.url, reason);
                    match self.store.find_content_by_hash(source_type, &item.content_hash).await? {
                        Some(found) => Ok(ApplyOutcome::Duplicate(found.id)),
                        None => Err(StoreError::Conflict(reason).into()),
                    }
                }
                Err(e) => Err(e.into()),
            };
        }

        let creator_id = match creator {
            ItemCreator::Known(id) => id,
            ItemCreator::Upsert(new_creator) => self.store.upsert_creator(new_creator).await?,
        };

        let insert = self
            .store
            .insert_content(NewContentItem {
                creator_id,
                source_type,
                external_id: item.external_id.clone(),
                title: item.title.clone(),
                description: item.description.clone(),
                url: item.url.clone(),
                author: item.author.clone(),
                body: item.body.clone(),
                published_at: item.published_at,
                content_hash: item.content_hash.clone(),
            })
            .await;

        match insert {
            Ok(stored) => {
                debug!("Stored new item {} as {}", item.url, stored.id);
                Ok(ApplyOutcome::Created(stored.id))
            }
            // Another cycle stored the same identity between our lookup and insert.
            Err(StoreError::Conflict(reason)) => {
                debug!("Insert raced for {}: {}", item.url, reason);
                let winner = match self.store.find_content_by_hash(source_type, &item.content_hash).await? {
                    Some(found) => Some(found),
                    None => self.store.find_content_by_external_id(source_type, &item.external_id).await?,
                };
                match winner {
                    Some(found) => Ok(ApplyOutcome::Duplicate(found.id)),
                    None => Err(StoreError::Conflict(reason).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate one inbox message exactly once. Whatever the outcome, a
    /// ledger row exists for the message afterwards.
    pub async fn ingest_message(&self, extractor: &InboxExtractor, message: &MailboxMessage) -> Result<MessageOutcome> {
        if self.store.is_message_processed(&message.id).await? {
            return Ok(MessageOutcome::AlreadyProcessed);
        }

        let Some(post) = extractor.extract(message) else {
            debug!("Message {} is not a newsletter post", message.id);
            self.store.record_processed_message(&message.id, None, None).await?;
            return Ok(MessageOutcome::Rejected);
        };

        let creator = ItemCreator::Upsert(mailbox_creator(&post));
        let item = post.into_normalized();
        let outcome = self.apply(SourceType::Mailbox, &item, creator).await?;

        self.store
            .record_processed_message(&message.id, Some(&item.content_hash), Some(outcome.content_id()))
            .await?;
        Ok(MessageOutcome::Applied(outcome))
    }
}

fn mailbox_creator(post: &NewsletterPost) -> NewCreator {
    NewCreator {
        source_type: SourceType::Mailbox,
        external_id: post.author_email.clone(),
        name: post.author_name.clone(),
        description: None,
        profile_url: None,
        metadata: serde_json::json!({ "email": post.author_email }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use interfaces::hash::feed_item_hash;
    use interfaces::{CacheTokens, ContentItem, Creator, MemoryStore, NewSource, ProcessedMessage, Source, StoreResult, SyncStatus};

    fn item(url: &str, title: &str, content: &str) -> NormalizedItem {
        NormalizedItem {
            external_id: url.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            description: Some(content.to_string()),
            author: None,
            body: Some(content.to_string()),
            published_at: Utc::now(),
            published_estimated: false,
            content_hash: feed_item_hash(url, title, content),
        }
    }

    fn new_creator(external_id: &str) -> NewCreator {
        NewCreator {
            source_type: SourceType::Feed,
            external_id: external_id.to_string(),
            name: "Blog".to_string(),
            description: None,
            profile_url: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Delegates to a `MemoryStore` but misses the first hash lookup, which
    /// is what a concurrent cycle storing the same hash looks like.
    struct StaleHashLookup {
        inner: MemoryStore,
        miss_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ContentStore for StaleHashLookup {
        async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
            self.inner.get_source(id).await
        }
        async fn list_active_sources(&self, user_id: &str) -> StoreResult<Vec<Source>> {
            self.inner.list_active_sources(user_id).await
        }
        async fn find_active_source_by_feed_url(&self, user_id: &str, feed_url: &str) -> StoreResult<Option<Source>> {
            self.inner.find_active_source_by_feed_url(user_id, feed_url).await
        }
        async fn create_source(&self, source: NewSource) -> StoreResult<Source> {
            self.inner.create_source(source).await
        }
        async fn update_sync_status(
            &self,
            id: Uuid,
            status: SyncStatus,
            error: Option<&str>,
            synced_at: Option<DateTime<Utc>>,
        ) -> StoreResult<()> {
            self.inner.update_sync_status(id, status, error, synced_at).await
        }
        async fn update_cache_tokens(&self, id: Uuid, tokens: &CacheTokens) -> StoreResult<()> {
            self.inner.update_cache_tokens(id, tokens).await
        }
        async fn deactivate_source(&self, id: Uuid) -> StoreResult<()> {
            self.inner.deactivate_source(id).await
        }
        async fn upsert_creator(&self, creator: NewCreator) -> StoreResult<Uuid> {
            self.inner.upsert_creator(creator).await
        }
        async fn get_creator(&self, id: Uuid) -> StoreResult<Option<Creator>> {
            self.inner.get_creator(id).await
        }
        async fn find_content_by_hash(&self, source_type: SourceType, hash: &str) -> StoreResult<Option<ContentItem>> {
            if self.miss_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_content_by_hash(source_type, hash).await
        }
        async fn find_content_by_external_id(
            &self,
            source_type: SourceType,
            external_id: &str,
        ) -> StoreResult<Option<ContentItem>> {
            self.inner.find_content_by_external_id(source_type, external_id).await
        }
        async fn insert_content(&self, item: NewContentItem) -> StoreResult<ContentItem> {
            self.inner.insert_content(item).await
        }
        async fn update_content(&self, id: Uuid, edit: ContentEdit) -> StoreResult<()> {
            self.inner.update_content(id, edit).await
        }
        async fn is_message_processed(&self, message_id: &str) -> StoreResult<bool> {
            self.inner.is_message_processed(message_id).await
        }
        async fn record_processed_message(
            &self,
            message_id: &str,
            content_hash: Option<&str>,
            content_id: Option<Uuid>,
        ) -> StoreResult<()> {
            self.inner.record_processed_message(message_id, content_hash, content_id).await
        }
        async fn get_processed_message(&self, message_id: &str) -> StoreResult<Option<ProcessedMessage>> {
            self.inner.get_processed_message(message_id).await
        }
        async fn count_content(&self, source_type: SourceType) -> StoreResult<usize> {
            self.inner.count_content(source_type).await
        }
    }

    fn creator(external_id: &str) -> ItemCreator {
        ItemCreator::Upsert(new_creator(external_id))
    }

    #[test]
    fn second_apply_is_a_duplicate() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let state = IngestState::new(store.clone());
            let post = item("https://blog.example/a", "A", "body");

            let first = state.apply(SourceType::Feed, &post, creator("feed")).await.unwrap();
            let second = state.apply(SourceType::Feed, &post, creator("feed")).await.unwrap();

            assert!(matches!(first, ApplyOutcome::Created(_)));
            assert_eq!(second, ApplyOutcome::Duplicate(first.content_id()));
            assert_eq!(store.content_items().await.len(), 1);
        });
    }

    #[test]
    fn changed_content_under_same_identity_is_an_edit() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let state = IngestState::new(store.clone());
            let original = item("https://blog.example/a", "A", "body");
            let edited = item("https://blog.example/a", "A", "new body");

            let created = state.apply(SourceType::Feed, &original, creator("feed")).await.unwrap();
            let updated = state.apply(SourceType::Feed, &edited, creator("feed")).await.unwrap();

            assert_eq!(updated, ApplyOutcome::Updated(created.content_id()));
            let items = store.content_items().await;
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].content_hash, edited.content_hash);
            assert!(items[0].edited);
        });
    }

    #[test]
    fn mailbox_items_are_immutable() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let state = IngestState::new(store.clone());
            let original = item("https://pub.example/p/a", "A", "x");
            let changed = item("https://pub.example/p/a", "A (updated)", "x");

            let created = state.apply(SourceType::Mailbox, &original, creator("jane@pub.example")).await.unwrap();
            let again = state.apply(SourceType::Mailbox, &changed, creator("jane@pub.example")).await.unwrap();

            assert_eq!(again, ApplyOutcome::Duplicate(created.content_id()));
            assert_eq!(store.content_items().await[0].title, "A");
        });
    }

    #[test]
    fn same_hash_from_another_creator_keeps_the_original() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let state = IngestState::new(store.clone());
            let post = item("https://blog.example/a", "A", "body");

            let first = state.apply(SourceType::Feed, &post, creator("feed-one")).await.unwrap();
            let other = store.upsert_creator(new_creator("feed-two")).await.unwrap();
            let second = state.apply(SourceType::Feed, &post, ItemCreator::Known(other)).await.unwrap();

            assert_eq!(second, ApplyOutcome::Duplicate(first.content_id()));
            let items = store.content_items().await;
            assert_ne!(items[0].creator_id, other);
        });
    }

    #[test]
    fn edit_racing_a_stored_hash_is_a_duplicate() {
        tokio_test::block_on(async {
            let store = Arc::new(StaleHashLookup {
                inner: MemoryStore::new(),
                miss_next: std::sync::atomic::AtomicBool::new(false),
            });
            let state = IngestState::new(store.clone());
            let original = item("https://blog.example/a", "A", "body");
            let other = item("https://blog.example/b", "B", "other");
            // Same identity as `original`, same hash as `other`.
            let edited = NormalizedItem {
                content_hash: other.content_hash.clone(),
                ..item("https://blog.example/a", "A", "new body")
            };

            let created = state.apply(SourceType::Feed, &original, creator("feed")).await.unwrap();
            let winner = state.apply(SourceType::Feed, &other, creator("feed")).await.unwrap();

            store.miss_next.store(true, std::sync::atomic::Ordering::SeqCst);
            let raced = state.apply(SourceType::Feed, &edited, creator("feed")).await.unwrap();

            assert_eq!(raced, ApplyOutcome::Duplicate(winner.content_id()));
            let items = store.inner.content_items().await;
            let kept = items.iter().find(|c| c.id == created.content_id()).unwrap();
            assert_eq!(kept.content_hash, original.content_hash);
            assert!(!kept.edited);
        });
    }
}
