use crate::types::{AggregatorError, ParsedFeed, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use interfaces::hash::feed_item_hash;
use interfaces::text::{html_to_text, truncate_description};
use interfaces::{FeedType, NormalizedItem};
use serde::Deserialize;
use tracing::debug;

/// Bytes inspected when sniffing an unlabelled body.
const SNIFF_BYTES: usize = 4096;

const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/atom";
const JSON_FEED_MARKER: &str = "jsonfeed.org/version";

pub struct FeedParser;

impl FeedParser {
    /// Decide the feed format from the response `Content-Type`, falling back
    /// to sniffing the body. `None` means the body is not a feed.
    pub fn classify(content_type: Option<&str>, body: &[u8]) -> Option<FeedType> {
        if let Some(content_type) = content_type.map(str::to_ascii_lowercase) {
            if content_type.contains("rss+xml") {
                return Some(FeedType::Rss);
            }
            if content_type.contains("atom+xml") {
                return Some(FeedType::Atom);
            }
            if content_type.contains("feed+json") {
                return Some(FeedType::JsonFeed);
            }
        }
        Self::sniff(body)
    }

    fn sniff(body: &[u8]) -> Option<FeedType> {
        let head = String::from_utf8_lossy(&body[..body.len().min(SNIFF_BYTES)]).to_lowercase();
        let trimmed = head.trim_start_matches('\u{feff}').trim_start();

        if trimmed.starts_with('{') {
            return trimmed.contains(JSON_FEED_MARKER).then_some(FeedType::JsonFeed);
        }
        // Decide on the document element only; extension elements such as
        // `<feedburner:info>` must not count.
        match root_element(trimmed)? {
            "rss" | "rdf:rdf" => Some(FeedType::Rss),
            "feed" if trimmed.contains(ATOM_NAMESPACE) => Some(FeedType::Atom),
            _ => None,
        }
    }

    /// Parse a payload of a known format into normalized items.
    pub fn parse(feed_type: FeedType, body: &[u8], feed_url: &str) -> Result<ParsedFeed> {
        debug!("Parsing {} feed from {} ({} bytes)", feed_type, feed_url, body.len());
        let parse_error = |message: String| AggregatorError::Parse {
            url: feed_url.to_string(),
            message,
        };
        let fetched_at = Utc::now();

        match feed_type {
            FeedType::Rss | FeedType::Atom => {
                let feed = parser::parse(body).map_err(|e| parse_error(e.to_string()))?;
                Ok(Self::from_syndication(feed_type, feed, &String::from_utf8_lossy(body), fetched_at))
            }
            FeedType::JsonFeed => {
                let document: JsonFeedDocument =
                    serde_json::from_slice(body).map_err(|e| parse_error(e.to_string()))?;
                if !document.version.contains(JSON_FEED_MARKER) {
                    return Err(parse_error(format!("unexpected JSON feed version '{}'", document.version)));
                }
                Ok(Self::from_json_feed(document, fetched_at))
            }
        }
    }

    fn from_syndication(
        feed_type: FeedType,
        feed: feed_rs::model::Feed,
        raw: &str,
        fetched_at: DateTime<Utc>,
    ) -> ParsedFeed {
        let items = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let link = alternate_link(&entry.links);
                // feed-rs synthesizes an id for entries without one; only an
                // id that actually occurs in the document counts as a GUID.
                let guid = Some(entry.id).filter(|id| !id.trim().is_empty() && declared_in(raw, id));
                let summary = entry.summary.map(|s| s.content);
                let content = entry.content.and_then(|c| c.body);
                let author = entry
                    .authors
                    .into_iter()
                    .map(|a| a.name)
                    .find(|name| !name.trim().is_empty());

                build_item(
                    RawItem {
                        guid,
                        link,
                        title: entry.title.map(|t| t.content),
                        content,
                        summary,
                        author,
                        published: entry.published.or(entry.updated),
                    },
                    fetched_at,
                )
            })
            .collect();

        ParsedFeed {
            feed_type,
            title: feed.title.map(|t| t.content),
            description: feed.description.map(|d| d.content),
            link: alternate_link(&feed.links),
            items,
        }
    }

    fn from_json_feed(document: JsonFeedDocument, fetched_at: DateTime<Utc>) -> ParsedFeed {
        let feed_author = document.author_name();
        let items = document
            .items
            .into_iter()
            .filter_map(|item| {
                let author = item.author_name().or_else(|| feed_author.clone());
                let published = item
                    .date_published
                    .as_deref()
                    .or(item.date_modified.as_deref())
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc));

                build_item(
                    RawItem {
                        guid: item.id.as_ref().and_then(json_id),
                        link: item.url.or(item.external_url),
                        title: item.title,
                        content: item.content_html.or(item.content_text),
                        summary: item.summary,
                        author,
                        published,
                    },
                    fetched_at,
                )
            })
            .collect();

        ParsedFeed {
            feed_type: FeedType::JsonFeed,
            title: document.title,
            description: document.description,
            link: document.home_page_url,
            items,
        }
    }
}

/// Format-independent view of one entry before normalization.
struct RawItem {
    guid: Option<String>,
    link: Option<String>,
    title: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    author: Option<String>,
    published: Option<DateTime<Utc>>,
}

/// Identity is the GUID falling back to the link; the hashed URL is the link
/// falling back to the GUID. Entries with neither are dropped.
fn build_item(raw: RawItem, fetched_at: DateTime<Utc>) -> Option<NormalizedItem> {
    let link = raw.link.filter(|l| !l.trim().is_empty());
    let external_id = raw.guid.clone().or_else(|| link.clone())?;
    let url = link.or(raw.guid).unwrap_or_else(|| external_id.clone());
    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let content_or_summary = raw.content.as_deref().or(raw.summary.as_deref()).unwrap_or("");
    let content_hash = feed_item_hash(&url, &title, content_or_summary);

    let description = raw
        .summary
        .as_deref()
        .or(raw.content.as_deref())
        .map(html_to_text)
        .filter(|text| !text.is_empty())
        .map(|text| truncate_description(&text));

    let (published_at, published_estimated) = match raw.published {
        Some(published) => (published, false),
        None => {
            debug!("No publish date on {}, using fetch time", url);
            (fetched_at, true)
        }
    };

    Some(NormalizedItem {
        external_id,
        url,
        title,
        description,
        author: raw.author,
        body: raw.content.or(raw.summary),
        published_at,
        published_estimated,
        content_hash,
    })
}

/// Name of the first element, skipping the XML declaration, processing
/// instructions, comments and the doctype.
fn root_element(xml: &str) -> Option<&str> {
    let mut rest = xml;
    loop {
        rest = &rest[rest.find('<')? + 1..];
        if let Some(comment) = rest.strip_prefix("!--") {
            rest = &comment[comment.find("-->")? + 3..];
        } else if !rest.starts_with('?') && !rest.starts_with('!') {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(rest.len());
            return Some(&rest[..end]);
        }
    }
}

/// The page an entry or feed points at: `rel="alternate"` or no rel at all.
/// Atom puts `self`, `edit` and `replies` links alongside it in any order.
fn alternate_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|link| link.rel.as_deref().map_or(true, |rel| rel.eq_ignore_ascii_case("alternate")))
        .or_else(|| links.first())
        .map(|link| link.href.clone())
}

fn declared_in(raw: &str, id: &str) -> bool {
    if raw.contains(id) {
        return true;
    }
    let escaped = id
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;");
    raw.contains(&escaped)
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct JsonFeedDocument {
    version: String,
    title: Option<String>,
    description: Option<String>,
    home_page_url: Option<String>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: Option<serde_json::Value>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
}

// Version 1.0 has a single `author`, 1.1 an `authors` list.
fn first_author(author: &Option<JsonFeedAuthor>, authors: &[JsonFeedAuthor]) -> Option<String> {
    author
        .iter()
        .chain(authors)
        .filter_map(|a| a.name.clone())
        .find(|name| !name.trim().is_empty())
}

impl JsonFeedDocument {
    fn author_name(&self) -> Option<String> {
        first_author(&self.author, &self.authors)
    }
}

impl JsonFeedItem {
    fn author_name(&self) -> Option<String> {
        first_author(&self.author, &self.authors)
    }
}
