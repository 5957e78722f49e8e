pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod feed_manager;
pub mod fetcher;
pub mod observability;
pub mod parser;
pub mod state;
pub mod traits;
pub mod types;

pub use aggregator::Aggregator;
pub use discovery::FeedDiscovery;
pub use feed_manager::FeedManager;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use state::IngestState;
pub use traits::FeedFetch;
pub use types::*;
