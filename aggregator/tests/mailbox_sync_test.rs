mod common;

use aggregator::{Aggregator, FetchConfig, SyncOutcome};
use common::*;
use interfaces::{ContentStore, SourceType, SyncStatus};
use std::sync::Arc;

const MAILBOX: &str = "email://reader@imap.example.com/INBOX";

fn newsletter(id: &str) -> email_ingestion::MailboxMessage {
    html_message(
        id,
        "Jane Writer <jane@janewrites.example>",
        "Ownership",
        r#"<html><body><img src="https://substackcdn.com/image/fetch/logo.png"><p>This week: ownership.</p><a href="https://janewrites.example/p/ownership?utm_source=email">Read online</a></body></html>"#,
    )
}

fn receipt(id: &str) -> email_ingestion::MailboxMessage {
    html_message(
        id,
        "billing@shop.example",
        "Your receipt",
        r#"<html><body><a href="https://shop.example/orders/42">Order</a></body></html>"#,
    )
}

fn aggregator_with(store: Arc<interfaces::MemoryStore>, connector: ScriptedConnector) -> Aggregator {
    Aggregator::new(store, Arc::new(ScriptedFetcher::default()), FetchConfig::default())
        .unwrap()
        .with_mailboxes(Arc::new(connector))
}

#[tokio::test]
async fn rerunning_a_mailbox_sync_is_idempotent() {
    let store = shared_store();
    let source = mailbox_source(&store, MAILBOX).await;
    let messages = vec![newsletter("imap:a/INBOX/1:1"), receipt("imap:a/INBOX/1:2")];
    let aggregator = aggregator_with(store.clone(), ScriptedConnector { messages, broken: false });

    let first = aggregator.sync_source(&source).await.unwrap();
    assert_eq!(first.outcome, SyncOutcome::Success);
    assert_eq!(first.items.created, 1);
    assert_eq!(first.items.rejected, 1);

    let second = aggregator.sync_source(&source).await.unwrap();
    assert_eq!(second.items.created, 0);
    assert_eq!(second.items.duplicate, 2);

    assert_eq!(store.processed_message_count().await, 2);
    assert_eq!(store.count_content(SourceType::Mailbox).await.unwrap(), 1);

    let post = &store.content_items().await[0];
    assert_eq!(post.url, "https://janewrites.example/p/ownership");
    assert_eq!(post.author.as_deref(), Some("Jane Writer"));

    let creators = store.creators().await;
    assert_eq!(creators.len(), 1);
    assert_eq!(creators[0].external_id, "jane@janewrites.example");

    let rejected = store.get_processed_message("imap:a/INBOX/1:2").await.unwrap().unwrap();
    assert_eq!(rejected.content_id, None);
    assert_eq!(rejected.content_hash, None);
}

#[tokio::test]
async fn resent_newsletter_points_at_the_existing_item() {
    let store = shared_store();
    let source = mailbox_source(&store, MAILBOX).await;
    let messages = vec![newsletter("imap:a/INBOX/1:1"), newsletter("imap:a/INBOX/1:7")];
    let aggregator = aggregator_with(store.clone(), ScriptedConnector { messages, broken: false });

    let report = aggregator.sync_source(&source).await.unwrap();
    assert_eq!(report.items.created, 1);
    assert_eq!(report.items.duplicate, 1);

    let original = store.get_processed_message("imap:a/INBOX/1:1").await.unwrap().unwrap();
    let resent = store.get_processed_message("imap:a/INBOX/1:7").await.unwrap().unwrap();
    assert!(original.content_id.is_some());
    assert_eq!(original.content_id, resent.content_id);
    assert_eq!(original.content_hash, resent.content_hash);
}

#[tokio::test]
async fn mailbox_failures_are_recorded_on_the_source() {
    let store = shared_store();
    let source = mailbox_source(&store, MAILBOX).await;
    let aggregator = aggregator_with(store.clone(), ScriptedConnector { messages: vec![], broken: true });

    let report = aggregator.sync_source(&source).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Error);
    let stored = store.get_source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.last_sync_status, Some(SyncStatus::Error));
    assert!(stored.last_error.unwrap_or_default().contains("Login failed"));
}

#[tokio::test]
async fn mailboxes_are_skipped_without_a_connector() {
    let store = shared_store();
    let source = mailbox_source(&store, MAILBOX).await;
    let aggregator = Aggregator::new(store.clone(), Arc::new(ScriptedFetcher::default()), FetchConfig::default()).unwrap();

    let batch = aggregator.sync_user(USER).await.unwrap();

    assert_eq!(batch.skipped, 1);
    assert_eq!(batch.processed, 1);
    let stored = store.get_source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.last_sync_status, None);
}
