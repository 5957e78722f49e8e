use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Already-decrypted login material for one mailbox account.
#[derive(Debug, Clone)]
pub struct EmailCredential {
    pub email_address: String,
    pub password: String,
}

/// Supplies mailbox credentials. Storage and encryption of the secrets live
/// behind this trait, outside the ingestion pipeline.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, email_address: &str) -> Result<Option<EmailCredential>>;
}

/// Credentials fixed at startup, e.g. from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    by_address: HashMap<String, String>,
    fallback_password: Option<String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Password used for any account without an explicit entry.
    pub fn with_fallback_password(mut self, password: impl Into<String>) -> Self {
        self.fallback_password = Some(password.into());
        self
    }

    pub fn insert(&mut self, email_address: impl Into<String>, password: impl Into<String>) {
        self.by_address.insert(email_address.into(), password.into());
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self, email_address: &str) -> Result<Option<EmailCredential>> {
        let password = self
            .by_address
            .get(email_address)
            .or(self.fallback_password.as_ref());
        Ok(password.map(|password| EmailCredential {
            email_address: email_address.to_string(),
            password: password.clone(),
        }))
    }
}
