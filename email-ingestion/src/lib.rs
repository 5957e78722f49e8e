pub mod credentials;
pub mod email_ingester;
pub mod extractor;
pub mod message;
pub mod url_rules;

pub use credentials::{CredentialProvider, EmailCredential, StaticCredentials};
pub use email_ingester::{EmailIngesterConfig, ImapConnector, ImapMailbox, Mailbox, MailboxConnector};
pub use extractor::{InboxExtractor, NewsletterPost};
pub use message::MailboxMessage;
pub use url_rules::UrlRuleSet;
