use chrono::{DateTime, Utc};
use interfaces::hash::mailbox_post_hash;
use interfaces::text::{html_to_text, truncate};
use interfaces::NormalizedItem;
use mail_parser::{Message, MessageParser, PartType};
use serde::Serialize;
use tracing::debug;

use crate::message::{split_sender, MailboxMessage};
use crate::url_rules::UrlRuleSet;

const EXCERPT_MAX_CHARS: usize = 200;

/// A newsletter post recovered from one inbox message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsletterPost {
    pub message_id: String,
    pub author_name: String,
    pub author_email: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub published_estimated: bool,
    pub html: String,
}

impl NewsletterPost {
    pub fn content_hash(&self) -> String {
        mailbox_post_hash(&self.url, &self.title, &self.author_name)
    }

    /// Mailbox posts are identified by their canonical URL.
    pub fn into_normalized(self) -> NormalizedItem {
        let content_hash = self.content_hash();
        NormalizedItem {
            external_id: self.url.clone(),
            url: self.url,
            title: self.title,
            description: self.excerpt,
            author: Some(self.author_name),
            body: Some(self.html),
            published_at: self.published_at,
            published_estimated: self.published_estimated,
            content_hash,
        }
    }
}

pub struct InboxExtractor {
    rules: UrlRuleSet,
}

impl InboxExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self::with_rules(UrlRuleSet::newsletter_defaults()?))
    }

    pub fn with_rules(rules: UrlRuleSet) -> Self {
        Self { rules }
    }

    /// Returns `None` for anything that is not a recognisable newsletter post.
    /// Never fails: a malformed message is simply not extractable.
    pub fn extract(&self, message: &MailboxMessage) -> Option<NewsletterPost> {
        let parsed = match MessageParser::default().parse(&message.raw) {
            Some(parsed) => parsed,
            None => {
                debug!("Message {} could not be parsed as RFC 822", message.id);
                return None;
            }
        };

        let (author_name, author_email) = sender(&parsed)?;
        let title = parsed.subject().unwrap_or("(No Subject)").trim().to_string();

        let html = match html_body(&parsed) {
            Some(html) => html,
            None => {
                debug!("Message {} has no HTML body", message.id);
                return None;
            }
        };

        let url = match self.rules.select_from_html(&html) {
            Some(url) => url,
            None => {
                debug!("Message {} has no recognisable post link", message.id);
                return None;
            }
        };

        let header_date = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));
        let (published_at, published_estimated) = match message.internal_date.or(header_date) {
            Some(at) => (at, false),
            None => (Utc::now(), true),
        };

        let excerpt = message
            .snippet
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                let text = html_to_text(&html);
                (!text.is_empty()).then(|| truncate(&text, EXCERPT_MAX_CHARS))
            });

        Some(NewsletterPost {
            message_id: message.id.clone(),
            author_name,
            author_email,
            title,
            excerpt,
            url,
            published_at,
            published_estimated,
            html,
        })
    }
}

fn sender(parsed: &Message<'_>) -> Option<(String, String)> {
    let addr = parsed.from().and_then(|addrs| addrs.first())?;
    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(address)) if !name.trim().is_empty() => {
            Some((name.trim().to_string(), address.trim().to_string()))
        }
        (_, Some(address)) => Some((address.trim().to_string(), address.trim().to_string())),
        (Some(raw), None) => Some(split_sender(raw)),
        (None, None) => None,
    }
}

/// First `text/html` part anywhere in the tree; failing that, a top-level
/// payload that is HTML in all but its declared type.
fn html_body(parsed: &Message<'_>) -> Option<String> {
    let html_part = parsed.parts.iter().find_map(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    });
    if html_part.is_some() {
        return html_part;
    }

    match parsed.parts.first().map(|part| &part.body) {
        Some(PartType::Text(text)) if looks_like_html(text) => Some(text.to_string()),
        _ => None,
    }
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<a href")
}
