use crate::types::{FetchOutcome, Result};
use async_trait::async_trait;
use interfaces::{CacheTokens, FeedType};

/// Conditional fetch plus parse of one feed endpoint.
///
/// A 304 must come back as [`FetchOutcome::NotModified`] without touching
/// the parser.
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch_feed(
        &self,
        feed_url: &str,
        feed_type: Option<FeedType>,
        cache: &CacheTokens,
    ) -> Result<FetchOutcome>;
}
