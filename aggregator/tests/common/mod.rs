#![allow(dead_code)]

use aggregator::{AggregatorError, FeedFetch, FeedParser, FetchOutcome, FetchedFeed, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use email_ingestion::{Mailbox, MailboxConnector, MailboxMessage};
use interfaces::{CacheTokens, ContentStore, DiscoveryMethod, FeedType, MemoryStore, NewSource, Source, SourceType};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const USER: &str = "alice";

/// Render a small RSS 2.0 document. Items are `(link, title, body)`.
pub fn rss(title: &str, items: &[(&str, &str, &str)]) -> String {
    let entries: String = items
        .iter()
        .map(|(link, item_title, body)| {
            format!(
                "<item><title>{}</title><link>{}</link><description>{}</description>\
                 <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate></item>",
                item_title, link, body
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{}</title><link>https://{}.example</link><description>Posts</description>{}</channel></rss>"#,
        title, title, entries
    )
}

pub enum Script {
    Feed { body: String, etag: Option<&'static str> },
    NotModified,
    Timeout,
    Status(u16),
}

/// Replays scripted responses per feed URL, recording the validators it was sent.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    pub seen_cache: Mutex<Vec<(String, CacheTokens)>>,
}

impl ScriptedFetcher {
    pub fn push(&self, feed_url: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(feed_url.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl FeedFetch for ScriptedFetcher {
    async fn fetch_feed(&self, feed_url: &str, feed_type: Option<FeedType>, cache: &CacheTokens) -> Result<FetchOutcome> {
        self.seen_cache.lock().unwrap().push((feed_url.to_string(), cache.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(feed_url)
            .and_then(|queue| queue.pop_front());

        match script {
            Some(Script::Feed { body, etag }) => {
                let feed = FeedParser::parse(feed_type.unwrap_or(FeedType::Rss), body.as_bytes(), feed_url)?;
                Ok(FetchOutcome::Fetched(FetchedFeed {
                    feed,
                    cache: CacheTokens {
                        etag: etag.map(str::to_string),
                        last_modified: None,
                    },
                }))
            }
            Some(Script::NotModified) => Ok(FetchOutcome::NotModified),
            Some(Script::Timeout) => Err(AggregatorError::Fetch {
                url: feed_url.to_string(),
                status: None,
                message: "Timed out after 30s".to_string(),
            }),
            Some(Script::Status(code)) => Err(AggregatorError::Fetch {
                url: feed_url.to_string(),
                status: Some(code),
                message: format!("HTTP {}", code),
            }),
            None => panic!("no scripted response left for {}", feed_url),
        }
    }
}

pub async fn feed_source(store: &MemoryStore, feed_url: &str) -> Source {
    store
        .create_source(NewSource {
            user_id: USER.to_string(),
            source_type: SourceType::Feed,
            site_url: feed_url.trim_end_matches("/feed.xml").to_string(),
            feed_url: feed_url.to_string(),
            feed_type: Some(FeedType::Rss),
            discovery_method: DiscoveryMethod::WellKnownPath,
            title: None,
            description: None,
        })
        .await
        .unwrap()
}

pub async fn mailbox_source(store: &MemoryStore, uri: &str) -> Source {
    store
        .create_source(NewSource {
            user_id: USER.to_string(),
            source_type: SourceType::Mailbox,
            site_url: "mailto:reader@example.com".to_string(),
            feed_url: uri.to_string(),
            feed_type: None,
            discovery_method: DiscoveryMethod::Manual,
            title: None,
            description: None,
        })
        .await
        .unwrap()
}

pub fn html_message(id: &str, from: &str, subject: &str, html: &str) -> MailboxMessage {
    let raw = format!(
        "From: {}\r\nTo: reader@example.com\r\nSubject: {}\r\nDate: Mon, 06 Jan 2025 10:00:00 +0000\r\n\
         MIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
        from, subject, html
    );
    MailboxMessage::new(id, raw.into_bytes()).with_internal_date(Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 5).unwrap())
}

pub struct ScriptedMailbox {
    messages: Vec<MailboxMessage>,
}

#[async_trait]
impl Mailbox for ScriptedMailbox {
    async fn fetch_messages(&self, _since: Option<chrono::DateTime<Utc>>) -> anyhow::Result<Vec<MailboxMessage>> {
        Ok(self.messages.clone())
    }
}

/// Hands out the same messages on every connect, or fails when `broken`.
pub struct ScriptedConnector {
    pub messages: Vec<MailboxMessage>,
    pub broken: bool,
}

#[async_trait]
impl MailboxConnector for ScriptedConnector {
    async fn connect(&self, mailbox_uri: &str) -> anyhow::Result<Box<dyn Mailbox>> {
        if self.broken {
            anyhow::bail!("Login failed for {}", mailbox_uri);
        }
        Ok(Box::new(ScriptedMailbox {
            messages: self.messages.clone(),
        }))
    }
}

pub fn shared_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}
