use crate::state::{IngestState, ItemCreator, MessageOutcome};
use crate::traits::FeedFetch;
use crate::types::{
    AggregatorError, BatchReport, FeedSyncReport, FetchConfig, FetchOutcome, ItemTally, ParsedFeed, Result,
    SyncOutcome,
};
use chrono::Utc;
use email_ingestion::{InboxExtractor, MailboxConnector};
use futures::{stream, StreamExt, TryStreamExt};
use interfaces::{ApplyOutcome, ContentStore, NewCreator, Source, SourceType, SyncStatus};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Drives sync cycles for feed and mailbox sources.
pub struct Aggregator {
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn FeedFetch>,
    mailboxes: Option<Arc<dyn MailboxConnector>>,
    extractor: InboxExtractor,
    state: IngestState,
    config: FetchConfig,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn FeedFetch>,
        config: FetchConfig,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            state: IngestState::new(store.clone()),
            store,
            fetcher,
            mailboxes: None,
            extractor: InboxExtractor::new()?,
            config,
        })
    }

    /// Without a connector, mailbox sources are skipped.
    pub fn with_mailboxes(mut self, connector: Arc<dyn MailboxConnector>) -> Self {
        self.mailboxes = Some(connector);
        self
    }

    pub async fn sync_source_by_id(&self, source_id: Uuid) -> Result<FeedSyncReport> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(AggregatorError::SourceNotFound { id: source_id })?;
        self.sync_source(&source).await
    }

    /// Run one full cycle for one source. Source-local failures are recorded
    /// on the source and reported; only store failures come back as `Err`.
    pub async fn sync_source(&self, source: &Source) -> Result<FeedSyncReport> {
        let span = info_span!("sync_source", source_id = %source.id, feed_url = %source.feed_url);
        self.run_cycle(source).instrument(span).await
    }

    async fn run_cycle(&self, source: &Source) -> Result<FeedSyncReport> {
        let cycle = match source.source_type {
            SourceType::Feed => self.sync_feed(source).await,
            SourceType::Mailbox => match &self.mailboxes {
                Some(connector) => self.sync_mailbox(source, connector.as_ref()).await,
                None => {
                    info!("No mailbox connector configured, skipping");
                    return Ok(FeedSyncReport::new(source.id, &source.feed_url, SyncOutcome::Skipped));
                }
            },
        };

        match cycle {
            Ok(report) => Ok(report),
            Err(e) if e.is_source_local() => {
                // Cache tokens stay as they were so the next cycle repeats the same request.
                warn!("Sync failed: {}", e);
                let message = e.to_string();
                self.store
                    .update_sync_status(source.id, SyncStatus::Error, Some(&message), None)
                    .await?;
                let mut report = FeedSyncReport::new(source.id, &source.feed_url, SyncOutcome::Error);
                report.error = Some(message);
                Ok(report)
            }
            Err(e) => {
                error!("Sync aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn sync_feed(&self, source: &Source) -> Result<FeedSyncReport> {
        let outcome = self
            .fetcher
            .fetch_feed(&source.feed_url, source.feed_type, &source.cache)
            .await?;

        let fetched = match outcome {
            FetchOutcome::NotModified => {
                self.store
                    .update_sync_status(source.id, SyncStatus::Success, None, Some(Utc::now()))
                    .await?;
                info!("Feed not modified");
                return Ok(FeedSyncReport::new(source.id, &source.feed_url, SyncOutcome::NotModified));
            }
            FetchOutcome::Fetched(fetched) => fetched,
        };

        let creator_id = self.store.upsert_creator(feed_creator(source, &fetched.feed)).await?;

        let mut report = FeedSyncReport::new(source.id, &source.feed_url, SyncOutcome::Success);
        for item in &fetched.feed.items {
            let outcome = self
                .state
                .apply(SourceType::Feed, item, ItemCreator::Known(creator_id))
                .await?;
            tally(&mut report.items, outcome);
        }

        self.store.update_cache_tokens(source.id, &fetched.cache).await?;
        self.store
            .update_sync_status(source.id, SyncStatus::Success, None, Some(Utc::now()))
            .await?;

        info!(
            created = report.items.created,
            updated = report.items.updated,
            duplicate = report.items.duplicate,
            "Feed synced"
        );
        Ok(report)
    }

    async fn sync_mailbox(&self, source: &Source, connector: &dyn MailboxConnector) -> Result<FeedSyncReport> {
        let started_at = Utc::now();
        let mailbox = connector
            .connect(&source.feed_url)
            .await
            .map_err(|e| AggregatorError::Mailbox(format!("{:#}", e)))?;
        let messages = mailbox
            .fetch_messages(source.last_synced_at)
            .await
            .map_err(|e| AggregatorError::Mailbox(format!("{:#}", e)))?;

        let mut report = FeedSyncReport::new(source.id, &source.feed_url, SyncOutcome::Success);
        for message in &messages {
            match self.state.ingest_message(&self.extractor, message).await? {
                MessageOutcome::AlreadyProcessed => report.items.duplicate += 1,
                MessageOutcome::Rejected => report.items.rejected += 1,
                MessageOutcome::Applied(outcome) => tally(&mut report.items, outcome),
            }
        }

        // The next search window starts from when this cycle began.
        self.store
            .update_sync_status(source.id, SyncStatus::Success, None, Some(started_at))
            .await?;

        info!(
            messages = messages.len(),
            created = report.items.created,
            rejected = report.items.rejected,
            "Mailbox synced"
        );
        Ok(report)
    }

    /// Sync every active source of a user, at most `max_concurrent_syncs` at
    /// a time. Completion order is not preserved.
    pub async fn sync_user(&self, user_id: &str) -> Result<BatchReport> {
        let sources = self.store.list_active_sources(user_id).await?;
        info!("Syncing {} sources for {}", sources.len(), user_id);

        let reports: Vec<FeedSyncReport> = stream::iter(sources.iter())
            .map(|source| self.sync_source(source))
            .buffer_unordered(self.config.max_concurrent_syncs.max(1))
            .try_collect()
            .await?;

        let batch: BatchReport = reports.into_iter().collect();
        info!(
            processed = batch.processed,
            succeeded = batch.succeeded,
            not_modified = batch.not_modified,
            errored = batch.errored,
            skipped = batch.skipped,
            "Batch finished"
        );
        Ok(batch)
    }
}

fn tally(items: &mut ItemTally, outcome: ApplyOutcome) {
    match outcome {
        ApplyOutcome::Created(_) => items.created += 1,
        ApplyOutcome::Updated(_) => items.updated += 1,
        ApplyOutcome::Duplicate(_) => items.duplicate += 1,
    }
}

/// A feed's creator is keyed by its feed URL and refreshed from the latest payload.
fn feed_creator(source: &Source, feed: &ParsedFeed) -> NewCreator {
    let name = feed
        .title
        .clone()
        .or_else(|| source.title.clone())
        .unwrap_or_else(|| source.feed_url.clone());
    NewCreator {
        source_type: SourceType::Feed,
        external_id: source.feed_url.clone(),
        name,
        description: feed.description.clone(),
        profile_url: feed.link.clone().or_else(|| Some(source.site_url.clone())),
        metadata: serde_json::json!({
            "feed_type": feed.feed_type,
            "site_url": source.site_url,
        }),
    }
}
