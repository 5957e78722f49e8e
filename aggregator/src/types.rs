use interfaces::{CacheTokens, DiscoveryMethod, FeedType, NormalizedItem, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("No feed found for {site_url}; enter the feed URL manually")]
    Discovery { site_url: String },

    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        /// `None` for network errors and timeouts.
        status: Option<u16>,
        message: String,
    },

    #[error("Feed parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Source not found: {id}")]
    SourceNotFound { id: Uuid },

    #[error("Already subscribed to {feed_url}")]
    AlreadySubscribed { feed_url: String },

    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Mailbox error: {0}")]
    Mailbox(String),
}

impl AggregatorError {
    /// Failures confined to one source. Everything else (store, client setup)
    /// is infrastructure and aborts the batch.
    pub fn is_source_local(&self) -> bool {
        matches!(
            self,
            AggregatorError::Discovery { .. }
                | AggregatorError::Fetch { .. }
                | AggregatorError::Parse { .. }
                | AggregatorError::Mailbox(_)
                | AggregatorError::InvalidUrl(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub max_concurrent_syncs: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "ContentAggregator/1.0".to_string(),
            timeout_seconds: 30,
            max_feed_size_mb: 10,
            max_redirects: 5,
            max_concurrent_syncs: 8,
        }
    }
}

impl FetchConfig {
    pub fn max_feed_bytes(&self) -> usize {
        self.max_feed_size_mb * 1024 * 1024
    }
}

/// A feed payload normalized into items, before any dedup.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub feed_type: FeedType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub items: Vec<NormalizedItem>,
}

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub feed: ParsedFeed,
    /// Validators from this response, to be sent on the next cycle.
    pub cache: CacheTokens,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    NotModified,
    Fetched(FetchedFeed),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFeed {
    pub site_url: String,
    pub feed_url: String,
    pub feed_type: FeedType,
    pub discovery_method: DiscoveryMethod,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    NotModified,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTally {
    pub created: usize,
    pub updated: usize,
    pub duplicate: usize,
    /// Mailbox messages that were not an extractable newsletter post.
    pub rejected: usize,
}

impl ItemTally {
    pub fn add(&mut self, other: &ItemTally) {
        self.created += other.created;
        self.updated += other.updated;
        self.duplicate += other.duplicate;
        self.rejected += other.rejected;
    }
}

/// Result of one source's sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSyncReport {
    pub source_id: Uuid,
    pub feed_url: String,
    pub outcome: SyncOutcome,
    pub error: Option<String>,
    pub items: ItemTally,
}

impl FeedSyncReport {
    pub fn new(source_id: Uuid, feed_url: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            source_id,
            feed_url: feed_url.into(),
            outcome,
            error: None,
            items: ItemTally::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub not_modified: usize,
    pub errored: usize,
    pub skipped: usize,
    pub items: ItemTally,
    pub sources: Vec<FeedSyncReport>,
}

impl BatchReport {
    pub fn record(&mut self, report: FeedSyncReport) {
        self.processed += 1;
        match report.outcome {
            SyncOutcome::Success => self.succeeded += 1,
            SyncOutcome::NotModified => self.not_modified += 1,
            SyncOutcome::Error => self.errored += 1,
            SyncOutcome::Skipped => self.skipped += 1,
        }
        self.items.add(&report.items);
        self.sources.push(report);
    }
}

impl FromIterator<FeedSyncReport> for BatchReport {
    fn from_iter<I: IntoIterator<Item = FeedSyncReport>>(iter: I) -> Self {
        let mut batch = BatchReport::default();
        for report in iter {
            batch.record(report);
        }
        batch
    }
}
