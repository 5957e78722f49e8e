use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::credentials::{CredentialProvider, EmailCredential};
use crate::message::MailboxMessage;

/// Messages pulled per IMAP `UID FETCH` round trip.
const DEFAULT_FETCH_BATCH: usize = 100;

/// A mailbox the orchestrator can pull raw messages from.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Every message that arrived on or after `since` (all messages when
    /// `None`). The caller advances its window past the result, so
    /// implementations must not truncate it.
    async fn fetch_messages(&self, since: Option<DateTime<Utc>>) -> Result<Vec<MailboxMessage>>;
}

/// Opens a [`Mailbox`] for a mailbox source URI.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, mailbox_uri: &str) -> Result<Box<dyn Mailbox>>;
}

#[derive(Clone)]
pub struct EmailIngesterConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub use_tls: bool,
    pub accept_invalid_certs: bool,
    pub accept_invalid_hostnames: bool,
    pub fetch_batch: usize,
}

impl std::fmt::Debug for EmailIngesterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailIngesterConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("mailbox", &self.mailbox)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl EmailIngesterConfig {
    /// Parse email configuration from URI and credentials
    /// Expected URI format: email://username@server:port/mailbox?tls=true
    pub fn from_uri_and_credentials(uri: &str, credentials: &EmailCredential) -> Result<Self> {
        let parsed_uri = Url::parse(uri)
            .map_err(|e| anyhow::anyhow!("Invalid email URI '{}': {}", uri, e))?;

        if parsed_uri.scheme() != "email" {
            return Err(anyhow::anyhow!("URI must use 'email://' scheme, got: {}", parsed_uri.scheme()));
        }

        let server = parsed_uri.host_str()
            .ok_or_else(|| anyhow::anyhow!("No server specified in URI: {}", uri))?
            .to_string();

        let port = parsed_uri.port().unwrap_or(993); // IMAPS

        let username = {
            let user = parsed_uri.username();
            if !user.is_empty() {
                url_decode(user)
            } else {
                credentials.email_address.clone()
            }
        };

        let mailbox = {
            let path = parsed_uri.path().trim_start_matches('/');
            if path.is_empty() {
                "INBOX".to_string()
            } else {
                url_decode(path)
            }
        };

        let flag = |name: &str, default: bool| {
            parsed_uri.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.parse().unwrap_or(default))
                .unwrap_or(default)
        };

        // The two "accept_invalid" flags exist for local test servers only.
        Ok(Self {
            server,
            port,
            username,
            password: credentials.password.clone(),
            mailbox,
            use_tls: flag("tls", true),
            accept_invalid_certs: flag("accept_invalid_certs", false),
            accept_invalid_hostnames: flag("accept_invalid_hostnames", false),
            fetch_batch: DEFAULT_FETCH_BATCH,
        })
    }

    fn message_id(&self, uid_validity: u32, uid: u32) -> String {
        format!("imap:{}@{}/{}/{}:{}", self.username, self.server, self.mailbox, uid_validity, uid)
    }
}

/// Percent-decode a URI component. `+` stays literal, as in userinfo and paths.
fn url_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Split search results into comma-separated UID sets of at most `batch` UIDs,
/// oldest first. Every UID lands in exactly one set.
fn uid_batches(mut uids: Vec<u32>, batch: usize) -> Vec<String> {
    uids.sort_unstable();
    uids.dedup();
    uids.chunks(batch.max(1))
        .map(|chunk| chunk.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
        .collect()
}

/// IMAP-backed mailbox. The `imap` client is blocking, so each fetch runs on
/// the blocking thread pool.
pub struct ImapMailbox {
    config: EmailIngesterConfig,
}

impl ImapMailbox {
    pub fn with_config(config: EmailIngesterConfig) -> Self {
        Self { config }
    }

    fn fetch_blocking(config: &EmailIngesterConfig, since: Option<DateTime<Utc>>) -> Result<Vec<MailboxMessage>> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .danger_accept_invalid_hostnames(config.accept_invalid_hostnames)
            .build()?;

        let client = if config.use_tls {
            imap::connect((config.server.as_str(), config.port), &config.server, &tls)?
        } else {
            imap::connect_starttls((config.server.as_str(), config.port), &config.server, &tls)?
        };

        let mut imap_session = client
            .login(&config.username, &config.password)
            .map_err(|(e, _)| anyhow::anyhow!("Login failed for {}: {}", config.username, e))?;
        let selected = imap_session.select(&config.mailbox)?;
        let uid_validity = selected.uid_validity.unwrap_or(0);

        // IMAP SINCE takes a dd-MMM-yyyy date and is day-granular.
        let search_criteria = match since {
            Some(last_sync) => format!("SINCE {}", last_sync.format("%d-%b-%Y")),
            None => "ALL".to_string(),
        };

        // The caller moves its window forward after this returns, so every
        // matching UID has to be fetched, not only the newest ones.
        let uids: Vec<u32> = imap_session.uid_search(&search_criteria)?.into_iter().collect();
        let mut messages = Vec::with_capacity(uids.len());
        for uid_set in uid_batches(uids, config.fetch_batch) {
            let fetches = imap_session.uid_fetch(&uid_set, "(UID INTERNALDATE RFC822)")?;
            for fetch in fetches.iter() {
                let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                    debug!("Skipping IMAP fetch without UID or body");
                    continue;
                };
                messages.push(MailboxMessage {
                    id: config.message_id(uid_validity, uid),
                    internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                    snippet: None,
                    raw: body.to_vec(),
                });
            }
        }

        imap_session.logout()?;
        Ok(messages)
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_messages(&self, since: Option<DateTime<Utc>>) -> Result<Vec<MailboxMessage>> {
        let config = self.config.clone();
        let messages = tokio::task::spawn_blocking(move || Self::fetch_blocking(&config, since)).await??;
        info!("Fetched {} messages from {}/{}", messages.len(), self.config.server, self.config.mailbox);
        Ok(messages)
    }
}

/// Connects mailbox sources over IMAP using credentials from a provider.
pub struct ImapConnector {
    credentials: Arc<dyn CredentialProvider>,
}

impl ImapConnector {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, mailbox_uri: &str) -> Result<Box<dyn Mailbox>> {
        let email_address = extract_email_address(mailbox_uri)?;
        let credentials = self
            .credentials
            .credentials(&email_address)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No credentials found for email address: {}", email_address))?;
        let config = EmailIngesterConfig::from_uri_and_credentials(mailbox_uri, &credentials)?;
        Ok(Box::new(ImapMailbox::with_config(config)))
    }
}

/// Extract email address from URI
/// Expected format: email://username@server:port/mailbox?tls=true
pub fn extract_email_address(uri: &str) -> Result<String> {
    let parsed = Url::parse(uri)
        .map_err(|e| anyhow::anyhow!("Invalid URI '{}': {}", uri, e))?;

    // A percent-encoded '@' in the user part means a full address was given.
    let username = url_decode(parsed.username());
    if username.contains('@') {
        return Ok(username);
    }

    let host = parsed.host_str()
        .ok_or_else(|| anyhow::anyhow!("No host in URI: {}", uri))?;

    if username.is_empty() {
        return Err(anyhow::anyhow!("No username in URI: {}", uri));
    }

    Ok(format!("{}@{}", username, host))
}
