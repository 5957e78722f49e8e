use crate::observability::LogFormat;
use crate::types::FetchConfig;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "aggregator", version, about = "Feed and newsletter ingestion")]
pub struct Cli {
    /// PostgreSQL connection string. Without it an in-memory store is used.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "AGGREGATOR_USER_AGENT", default_value = "ContentAggregator/1.0", global = true)]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub timeout_secs: u64,

    #[arg(long, env = "MAX_CONCURRENT_SYNCS", default_value_t = 8, global = true)]
    pub max_concurrent_syncs: usize,

    #[arg(long, env = "MAX_FEED_SIZE_MB", default_value_t = 10, global = true)]
    pub max_feed_size_mb: usize,

    /// Password used for mailbox sources.
    #[arg(long, env = "IMAP_PASSWORD", hide_env_values = true, global = true)]
    pub imap_password: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Find the feed for a site without subscribing
    Discover {
        site_url: String,
        #[arg(long)]
        feed_url: Option<String>,
    },
    /// Discover a site's feed and subscribe a user to it
    Subscribe {
        user: String,
        site_url: String,
        /// Skip discovery and use this feed URL
        #[arg(long)]
        feed_url: Option<String>,
    },
    /// Subscribe a user to a mailbox, e.g. email://me@imap.example.com/INBOX
    SubscribeMailbox { user: String, mailbox_uri: String },
    Unsubscribe { source_id: Uuid },
    /// Run one sync cycle over all of a user's active sources
    Sync { user: String },
    /// List a user's active sources
    Sources { user: String },
}

impl Cli {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout_seconds: self.timeout_secs,
            max_feed_size_mb: self.max_feed_size_mb,
            max_concurrent_syncs: self.max_concurrent_syncs,
            ..FetchConfig::default()
        }
    }
}
