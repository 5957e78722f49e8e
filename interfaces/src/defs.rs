use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::state::StoreError;

/// Where a piece of content came from. Dedup lookups are always scoped by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Feed,
    Mailbox,
}

/// The three feed wire formats. Parsing dispatches on this once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    Rss,
    Atom,
    JsonFeed,
}

/// How a feed endpoint was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    WellKnownPath,
    HtmlLinkTag,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(StoreError::Corrupt(format!(
                        "unknown {} value '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(SourceType { Feed => "feed", Mailbox => "mailbox" });
text_enum!(FeedType { Rss => "rss", Atom => "atom", JsonFeed => "json_feed" });
text_enum!(DiscoveryMethod {
    WellKnownPath => "well_known_path",
    HtmlLinkTag => "html_link_tag",
    Manual => "manual",
});
text_enum!(SyncStatus { Success => "success", Error => "error" });

/// HTTP caching validators remembered between sync cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTokens {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheTokens {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// One subscription of one user to a feed or a mailbox.
///
/// `feed_url` holds the mailbox URI for mailbox sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub user_id: String,
    pub source_type: SourceType,
    pub site_url: String,
    pub feed_url: String,
    pub feed_type: Option<FeedType>,
    pub discovery_method: DiscoveryMethod,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cache: CacheTokens,
    pub last_sync_status: Option<SyncStatus>,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub user_id: String,
    pub source_type: SourceType,
    pub site_url: String,
    pub feed_url: String,
    pub feed_type: Option<FeedType>,
    pub discovery_method: DiscoveryMethod,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Normalized author or publication, shared across source types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    pub id: Uuid,
    pub source_type: SourceType,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub profile_url: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCreator {
    pub source_type: SourceType,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub profile_url: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub source_type: SourceType,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub published_at: DateTime<Utc>,
    pub content_hash: String,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub creator_id: Uuid,
    pub source_type: SourceType,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub published_at: DateTime<Utc>,
    pub content_hash: String,
}

/// Fields rewritten in place when a feed item is edited upstream.
#[derive(Debug, Clone)]
pub struct ContentEdit {
    pub title: String,
    pub description: Option<String>,
    pub body: Option<String>,
    pub content_hash: String,
}

/// Ledger row marking one inbox message as evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub message_id: String,
    pub content_hash: Option<String>,
    pub content_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

/// The shape both the feed path and the inbox path converge on before dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Set when no publish date was present and the fetch time was substituted.
    pub published_estimated: bool,
    pub content_hash: String,
}

/// Result of applying one normalized item against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created(Uuid),
    Updated(Uuid),
    Duplicate(Uuid),
}

impl ApplyOutcome {
    pub fn content_id(&self) -> Uuid {
        match *self {
            ApplyOutcome::Created(id) | ApplyOutcome::Updated(id) | ApplyOutcome::Duplicate(id) => id,
        }
    }
}
