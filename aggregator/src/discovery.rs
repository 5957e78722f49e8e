use crate::fetcher::{FetchedBody, Fetcher, HttpResponse};
use crate::parser::FeedParser;
use crate::types::{AggregatorError, DiscoveredFeed, Result};
use interfaces::{DiscoveryMethod, FeedType};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Probed in order; the first one that answers with a feed wins.
pub const WELL_KNOWN_PATHS: &[&str] = &[
    "/feed.xml",
    "/rss.xml",
    "/atom.xml",
    "/feed/",
    "/index.xml",
    "/feed.json",
    "/rss/",
    "/feeds/rss.xml",
];

const FEED_MIME_TYPES: &[&str] = &["application/rss+xml", "application/atom+xml", "application/feed+json"];

pub struct FeedDiscovery {
    fetcher: Arc<Fetcher>,
    link_tag: Regex,
    attribute: Regex,
}

impl FeedDiscovery {
    pub fn new(fetcher: Arc<Fetcher>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            fetcher,
            link_tag: Regex::new(r"(?is)<link\b[^>]*>")?,
            attribute: Regex::new(r#"(?is)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)?,
        })
    }

    /// Locate the feed for a site: well-known paths first, then
    /// `<link rel="alternate">` tags on the home page.
    pub async fn discover(&self, site_url: &str) -> Result<DiscoveredFeed> {
        let site = normalize_site_url(site_url)?;
        info!("Discovering feed for {}", site);

        for path in WELL_KNOWN_PATHS {
            let candidate = format!("{}{}", site, path);
            if let Some(found) = self.verify(&site, &candidate, DiscoveryMethod::WellKnownPath).await {
                info!("Found {} feed at well-known path {}", found.feed_type, found.feed_url);
                return Ok(found);
            }
        }

        if let Some(found) = self.discover_from_html(&site).await {
            info!("Found {} feed via link tag: {}", found.feed_type, found.feed_url);
            return Ok(found);
        }

        Err(AggregatorError::Discovery {
            site_url: site_url.to_string(),
        })
    }

    /// Skip discovery and validate a feed URL the user supplied.
    pub async fn from_manual(&self, site_url: &str, feed_url: &str) -> Result<DiscoveredFeed> {
        let site = normalize_site_url(site_url)?;
        let feed_url = Url::parse(feed_url)?.to_string();

        let fetched = match self.fetcher.get(&feed_url, None).await? {
            HttpResponse::Body(fetched) => fetched,
            HttpResponse::NotModified => {
                return Err(AggregatorError::Fetch {
                    url: feed_url,
                    status: Some(304),
                    message: "Unexpected 304 for an unconditional request".to_string(),
                })
            }
        };

        let feed_type = FeedParser::classify(fetched.content_type.as_deref(), &fetched.body).ok_or_else(|| {
            AggregatorError::Parse {
                url: feed_url.clone(),
                message: "response is not an RSS, Atom or JSON feed".to_string(),
            }
        })?;
        let feed = FeedParser::parse(feed_type, &fetched.body, &feed_url)?;

        Ok(DiscoveredFeed {
            site_url: site,
            feed_url,
            feed_type,
            discovery_method: DiscoveryMethod::Manual,
            title: feed.title,
            description: feed.description,
        })
    }

    async fn discover_from_html(&self, site: &str) -> Option<DiscoveredFeed> {
        let page = match self.fetcher.get(site, None).await {
            Ok(HttpResponse::Body(page)) => page,
            Ok(HttpResponse::NotModified) => return None,
            Err(e) => {
                debug!("Could not load home page {}: {}", site, e);
                return None;
            }
        };

        let html = String::from_utf8_lossy(&page.body);
        for href in self.alternate_links(&html) {
            let Some(candidate) = resolve(&page.final_url, &href) else {
                debug!("Skipping unresolvable feed link {}", href);
                continue;
            };
            if let Some(found) = self.verify(site, &candidate, DiscoveryMethod::HtmlLinkTag).await {
                return Some(found);
            }
        }
        None
    }

    /// `href`s of `<link rel="alternate">` tags with a feed MIME type, in
    /// document order. Attribute order does not matter.
    pub fn alternate_links(&self, html: &str) -> Vec<String> {
        self.link_tag
            .find_iter(html)
            .filter_map(|tag| {
                let mut rel = None;
                let mut kind = None;
                let mut href = None;
                for cap in self.attribute.captures_iter(tag.as_str()) {
                    let value = cap
                        .get(2)
                        .or_else(|| cap.get(3))
                        .or_else(|| cap.get(4))
                        .map(|m| m.as_str().trim().to_string());
                    match cap[1].to_ascii_lowercase().as_str() {
                        "rel" => rel = value,
                        "type" => kind = value,
                        "href" => href = value,
                        _ => {}
                    }
                }

                let is_alternate = rel?
                    .split_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("alternate"));
                let kind = kind?.to_ascii_lowercase();
                let is_feed = FEED_MIME_TYPES.iter().any(|mime| kind.starts_with(mime));
                (is_alternate && is_feed).then_some(href?).filter(|h| !h.is_empty())
            })
            .collect()
    }

    /// Fetch a candidate and keep it only if it classifies and parses as a feed.
    async fn verify(&self, site: &str, candidate: &str, method: DiscoveryMethod) -> Option<DiscoveredFeed> {
        let fetched = match self.fetcher.get(candidate, None).await {
            Ok(HttpResponse::Body(fetched)) => fetched,
            Ok(HttpResponse::NotModified) => return None,
            Err(e) => {
                debug!("Probe {} failed: {}", candidate, e);
                return None;
            }
        };

        let feed_type = FeedParser::classify(fetched.content_type.as_deref(), &fetched.body)?;
        let (title, description) = metadata(feed_type, &fetched, candidate);

        Some(DiscoveredFeed {
            site_url: site.to_string(),
            feed_url: candidate.to_string(),
            feed_type,
            discovery_method: method,
            title,
            description,
        })
    }
}

/// Best effort: a feed that classifies but does not parse still counts as found.
fn metadata(feed_type: FeedType, fetched: &FetchedBody, url: &str) -> (Option<String>, Option<String>) {
    match FeedParser::parse(feed_type, &fetched.body, url) {
        Ok(feed) => (feed.title, feed.description),
        Err(e) => {
            debug!("No metadata from {}: {}", url, e);
            (None, None)
        }
    }
}

fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Add `https://` when no scheme was given and drop trailing slashes.
pub fn normalize_site_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = Url::parse(&with_scheme)?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
