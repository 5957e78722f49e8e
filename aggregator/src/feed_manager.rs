use crate::discovery::FeedDiscovery;
use crate::types::{AggregatorError, DiscoveredFeed, Result};
use email_ingestion::email_ingester::extract_email_address;
use interfaces::{ContentStore, DiscoveryMethod, NewSource, Source, SourceType};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Subscribe, unsubscribe and list sources for a user.
pub struct FeedManager {
    store: Arc<dyn ContentStore>,
    discovery: FeedDiscovery,
}

impl FeedManager {
    pub fn new(store: Arc<dyn ContentStore>, discovery: FeedDiscovery) -> Self {
        Self { store, discovery }
    }

    pub async fn discover(&self, site_url: &str, manual_feed_url: Option<&str>) -> Result<DiscoveredFeed> {
        match manual_feed_url {
            Some(feed_url) => self.discovery.from_manual(site_url, feed_url).await,
            None => self.discovery.discover(site_url).await,
        }
    }

    pub async fn subscribe(&self, user_id: &str, site_url: &str, manual_feed_url: Option<&str>) -> Result<Source> {
        let found = self.discover(site_url, manual_feed_url).await?;
        self.ensure_not_subscribed(user_id, &found.feed_url).await?;

        let source = self
            .store
            .create_source(NewSource {
                user_id: user_id.to_string(),
                source_type: SourceType::Feed,
                site_url: found.site_url,
                feed_url: found.feed_url,
                feed_type: Some(found.feed_type),
                discovery_method: found.discovery_method,
                title: found.title,
                description: found.description,
            })
            .await?;

        info!(
            "Subscribed {} to {} ({}, via {})",
            user_id, source.feed_url, found.feed_type, source.discovery_method
        );
        Ok(source)
    }

    /// Register a mailbox URI such as `email://reader@imap.example.com/INBOX`.
    pub async fn subscribe_mailbox(&self, user_id: &str, mailbox_uri: &str) -> Result<Source> {
        let address = extract_email_address(mailbox_uri).map_err(|e| AggregatorError::Mailbox(e.to_string()))?;
        self.ensure_not_subscribed(user_id, mailbox_uri).await?;

        let source = self
            .store
            .create_source(NewSource {
                user_id: user_id.to_string(),
                source_type: SourceType::Mailbox,
                site_url: format!("mailto:{}", address),
                feed_url: mailbox_uri.to_string(),
                feed_type: None,
                discovery_method: DiscoveryMethod::Manual,
                title: Some(address),
                description: None,
            })
            .await?;

        info!("Subscribed {} to mailbox {}", user_id, mailbox_uri);
        Ok(source)
    }

    /// Soft delete: stored content keeps referencing the source's creator.
    pub async fn unsubscribe(&self, source_id: Uuid) -> Result<()> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(AggregatorError::SourceNotFound { id: source_id })?;
        self.store.deactivate_source(source.id).await?;
        info!("Deactivated source {} ({})", source.id, source.feed_url);
        Ok(())
    }

    pub async fn list_sources(&self, user_id: &str) -> Result<Vec<Source>> {
        Ok(self.store.list_active_sources(user_id).await?)
    }

    async fn ensure_not_subscribed(&self, user_id: &str, feed_url: &str) -> Result<()> {
        match self.store.find_active_source_by_feed_url(user_id, feed_url).await? {
            Some(_) => Err(AggregatorError::AlreadySubscribed {
                feed_url: feed_url.to_string(),
            }),
            None => Ok(()),
        }
    }
}
