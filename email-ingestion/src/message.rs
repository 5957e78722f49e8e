use chrono::{DateTime, Utc};

/// One raw message as handed over by a mailbox provider.
#[derive(Debug, Clone)]
pub struct MailboxMessage {
    /// Stable provider-side identity, used as the ledger key.
    pub id: String,
    /// Server-assigned arrival time, preferred over the `Date` header.
    pub internal_date: Option<DateTime<Utc>>,
    /// Provider-supplied preview text, if the provider has one.
    pub snippet: Option<String>,
    /// The full RFC 822 message.
    pub raw: Vec<u8>,
}

impl MailboxMessage {
    pub fn new(id: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            internal_date: None,
            snippet: None,
            raw: raw.into(),
        }
    }

    pub fn with_internal_date(mut self, internal_date: DateTime<Utc>) -> Self {
        self.internal_date = Some(internal_date);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// Split a `From` value of the form `Name <address>` into its parts.
/// Anything else is used verbatim as both name and address.
pub fn split_sender(from: &str) -> (String, String) {
    let from = from.trim();
    if let (Some(open), true) = (from.rfind('<'), from.ends_with('>')) {
        let address = from[open + 1..from.len() - 1].trim();
        let name = from[..open].trim().trim_matches('"').trim();
        if !address.is_empty() {
            let name = if name.is_empty() { address } else { name };
            return (name.to_string(), address.to_string());
        }
    }
    (from.to_string(), from.to_string())
}
