use aggregator::config::{Cli, Command};
use aggregator::observability::init_logging;
use aggregator::{Aggregator, FeedDiscovery, FeedManager, Fetcher};
use anyhow::Context;
use clap::Parser;
use email_ingestion::{ImapConnector, StaticCredentials};
use interfaces::{ContentStore, MemoryStore, PgContentStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DATABASE_RETRY_WINDOW: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let store: Arc<dyn ContentStore> = match &cli.database_url {
        Some(url) => {
            let store = PgContentStore::connect_with_retry(url, DATABASE_RETRY_WINDOW)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.setup_schema().await.context("Failed to prepare schema")?;
            info!("Connected to PostgreSQL");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using an in-memory store; nothing will persist");
            Arc::new(MemoryStore::new())
        }
    };

    let config = cli.fetch_config();
    let fetcher = Arc::new(Fetcher::new(config.clone())?);
    let manager = FeedManager::new(store.clone(), FeedDiscovery::new(fetcher.clone())?);

    match cli.command {
        Command::Discover { site_url, feed_url } => {
            print_json(&manager.discover(&site_url, feed_url.as_deref()).await?)?;
        }
        Command::Subscribe { user, site_url, feed_url } => {
            print_json(&manager.subscribe(&user, &site_url, feed_url.as_deref()).await?)?;
        }
        Command::SubscribeMailbox { user, mailbox_uri } => {
            print_json(&manager.subscribe_mailbox(&user, &mailbox_uri).await?)?;
        }
        Command::Unsubscribe { source_id } => {
            manager.unsubscribe(source_id).await?;
        }
        Command::Sources { user } => {
            print_json(&manager.list_sources(&user).await?)?;
        }
        Command::Sync { user } => {
            let mut aggregator = Aggregator::new(store.clone(), fetcher.clone(), config)?;
            if let Some(password) = &cli.imap_password {
                let credentials = StaticCredentials::new().with_fallback_password(password.clone());
                aggregator = aggregator.with_mailboxes(Arc::new(ImapConnector::new(Arc::new(credentials))));
            }

            // Items applied before an interrupt stay stored; interrupted
            // sources keep their previous status.
            tokio::select! {
                report = aggregator.sync_user(&user) => print_json(&report?)?,
                _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping sync"),
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
