use crate::parser::FeedParser;
use crate::traits::FeedFetch;
use crate::types::{AggregatorError, FetchConfig, FetchOutcome, FetchedFeed, Result};
use async_trait::async_trait;
use interfaces::{CacheTokens, FeedType};
use reqwest::header::{HeaderName, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// A successful (2xx) response body with the headers the pipeline cares about.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub final_url: String,
    pub content_type: Option<String>,
    pub cache: CacheTokens,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum HttpResponse {
    NotModified,
    Body(FetchedBody),
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(AggregatorError::Client)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// One GET, conditional when `cache` carries validators. Never retries;
    /// a timeout is a fetch failure like any other.
    pub async fn get(&self, url: &str, cache: Option<&CacheTokens>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(cache) = cache {
            if let Some(etag) = &cache.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &cache.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let mut response = request.send().await.map_err(|e| network_error(url, &e, &self.config))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("Not modified: {}", url);
            return Ok(HttpResponse::NotModified);
        }

        if !status.is_success() {
            return Err(AggregatorError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let content_type = header(CONTENT_TYPE);
        let cache = CacheTokens {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };
        let final_url = response.url().to_string();

        let limit = self.config.max_feed_bytes();
        let too_large = |size: usize| AggregatorError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("Feed too large: {} bytes exceeds {}MB", size, self.config.max_feed_size_mb),
        };

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(too_large(length as usize));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| network_error(url, &e, &self.config))? {
            body.extend_from_slice(&chunk);
            if body.len() > limit {
                return Err(too_large(body.len()));
            }
        }

        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(HttpResponse::Body(FetchedBody {
            final_url,
            content_type,
            cache,
            body,
        }))
    }
}

fn network_error(url: &str, error: &reqwest::Error, config: &FetchConfig) -> AggregatorError {
    let message = if error.is_timeout() {
        format!("Timed out after {}s", config.timeout_seconds)
    } else {
        error.to_string()
    };
    AggregatorError::Fetch {
        url: url.to_string(),
        status: error.status().map(|s| s.as_u16()),
        message,
    }
}

#[async_trait]
impl FeedFetch for Fetcher {
    async fn fetch_feed(
        &self,
        feed_url: &str,
        feed_type: Option<FeedType>,
        cache: &CacheTokens,
    ) -> Result<FetchOutcome> {
        let fetched = match self.get(feed_url, Some(cache)).await? {
            HttpResponse::NotModified => return Ok(FetchOutcome::NotModified),
            HttpResponse::Body(fetched) => fetched,
        };

        let feed_type = feed_type
            .or_else(|| FeedParser::classify(fetched.content_type.as_deref(), &fetched.body))
            .ok_or_else(|| AggregatorError::Parse {
                url: feed_url.to_string(),
                message: "response is not an RSS, Atom or JSON feed".to_string(),
            })?;

        let feed = FeedParser::parse(feed_type, &fetched.body, feed_url)?;
        info!("Fetched {} items from {}", feed.items.len(), feed_url);

        Ok(FetchOutcome::Fetched(FetchedFeed {
            feed,
            cache: fetched.cache,
        }))
    }
}
