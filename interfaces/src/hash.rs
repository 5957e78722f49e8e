//! Dedup keys. The two compositions below are persisted and compared across
//! runs, so their exact byte layout must not change.

use sha2::{Digest, Sha256};

/// Length of the truncated hex digest used for feed items.
pub const FEED_HASH_LEN: usize = 16;

/// `SHA-256(url | title | content)`, hex, first 16 characters.
pub fn feed_item_hash(url: &str, title: &str, content_or_summary: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(content_or_summary.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FEED_HASH_LEN);
    digest
}

/// `SHA-256(post_url : title : author)`, full 64 hex characters.
pub fn mailbox_post_hash(post_url: &str, title: &str, author: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(post_url.as_bytes());
    hasher.update(b":");
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(author.as_bytes());
    hex::encode(hasher.finalize())
}
