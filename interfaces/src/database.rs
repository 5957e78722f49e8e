use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::defs::{
    CacheTokens, ContentEdit, ContentItem, Creator, NewContentItem, NewCreator, NewSource,
    ProcessedMessage, Source, SourceType, SyncStatus,
};
use crate::state::{ContentStore, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        source_type TEXT NOT NULL,
        site_url TEXT NOT NULL,
        feed_url TEXT NOT NULL,
        feed_type TEXT,
        discovery_method TEXT NOT NULL,
        title TEXT,
        description TEXT,
        etag TEXT,
        last_modified TEXT,
        last_sync_status TEXT,
        last_error TEXT,
        last_synced_at TIMESTAMP WITH TIME ZONE,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS sources_user_active ON sources (user_id, is_active)",
    r#"
    CREATE TABLE IF NOT EXISTS creators (
        id UUID PRIMARY KEY,
        source_type TEXT NOT NULL,
        external_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        profile_url TEXT,
        metadata JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        UNIQUE (source_type, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id UUID PRIMARY KEY,
        creator_id UUID NOT NULL REFERENCES creators (id),
        source_type TEXT NOT NULL,
        external_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        url TEXT NOT NULL,
        author TEXT,
        body TEXT,
        published_at TIMESTAMP WITH TIME ZONE NOT NULL,
        content_hash TEXT NOT NULL,
        edited BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        UNIQUE (source_type, content_hash),
        UNIQUE (source_type, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_messages (
        message_id TEXT PRIMARY KEY,
        content_hash TEXT,
        content_id UUID REFERENCES content_items (id),
        processed_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
];

const SOURCE_COLUMNS: &str = "id, user_id, source_type, site_url, feed_url, feed_type, discovery_method, \
     title, description, etag, last_modified, last_sync_status, last_error, last_synced_at, is_active, created_at";

const CONTENT_COLUMNS: &str = "id, creator_id, source_type, external_id, title, description, url, author, \
     body, published_at, content_hash, edited, created_at, updated_at";

pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Connects with exponential backoff, giving up after `max_elapsed`.
    pub async fn connect_with_retry(database_url: &str, max_elapsed: Duration) -> StoreResult<Self> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(max_elapsed),
            ..Default::default()
        };
        let pool = backoff::future::retry(policy, || async {
            PgPool::connect(database_url).await.map_err(|e| {
                warn!("Database not reachable yet: {}", e);
                backoff::Error::transient(e)
            })
        })
        .await?;
        info!("Connected to content database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn setup_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_opt<T: std::str::FromStr<Err = StoreError>>(value: Option<String>) -> StoreResult<Option<T>> {
    value.map(|v| v.parse()).transpose()
}

fn source_from_row(row: &PgRow) -> StoreResult<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        source_type: row.try_get::<String, _>("source_type")?.parse()?,
        site_url: row.try_get("site_url")?,
        feed_url: row.try_get("feed_url")?,
        feed_type: parse_opt(row.try_get("feed_type")?)?,
        discovery_method: row.try_get::<String, _>("discovery_method")?.parse()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        cache: CacheTokens {
            etag: row.try_get("etag")?,
            last_modified: row.try_get("last_modified")?,
        },
        last_sync_status: parse_opt(row.try_get("last_sync_status")?)?,
        last_error: row.try_get("last_error")?,
        last_synced_at: row.try_get("last_synced_at")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn content_from_row(row: &PgRow) -> StoreResult<ContentItem> {
    Ok(ContentItem {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        source_type: row.try_get::<String, _>("source_type")?.parse()?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        author: row.try_get("author")?,
        body: row.try_get("body")?,
        published_at: row.try_get("published_at")?,
        content_hash: row.try_get("content_hash")?,
        edited: row.try_get("edited")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn creator_from_row(row: &PgRow) -> StoreResult<Creator> {
    Ok(Creator {
        id: row.try_get("id")?,
        source_type: row.try_get::<String, _>("source_type")?.parse()?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        profile_url: row.try_get("profile_url")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn conflict_or(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = $1", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_active_sources(&self, user_id: &str) -> StoreResult<Vec<Source>> {
        let query = format!(
            "SELECT {} FROM sources WHERE user_id = $1 AND is_active = TRUE ORDER BY created_at",
            SOURCE_COLUMNS
        );
        let mut rows = sqlx::query(&query).bind(user_id).fetch(&self.pool);
        let mut sources = Vec::new();
        while let Some(row) = rows.try_next().await? {
            sources.push(source_from_row(&row)?);
        }
        Ok(sources)
    }

    async fn find_active_source_by_feed_url(&self, user_id: &str, feed_url: &str) -> StoreResult<Option<Source>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE user_id = $1 AND feed_url = $2 AND is_active = TRUE LIMIT 1",
            SOURCE_COLUMNS
        ))
        .bind(user_id)
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn create_source(&self, source: NewSource) -> StoreResult<Source> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sources (id, user_id, source_type, site_url, feed_url, feed_type, discovery_method, title, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            SOURCE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&source.user_id)
        .bind(source.source_type.as_str())
        .bind(&source.site_url)
        .bind(&source.feed_url)
        .bind(source.feed_type.map(|t| t.as_str()))
        .bind(source.discovery_method.as_str())
        .bind(&source.title)
        .bind(&source.description)
        .fetch_one(&self.pool)
        .await?;
        source_from_row(&row)
    }

    async fn update_sync_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        error: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sources
            SET last_sync_status = $2, last_error = $3, last_synced_at = COALESCE($4, last_synced_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "source", id: id.to_string() });
        }
        Ok(())
    }

    async fn update_cache_tokens(&self, id: Uuid, tokens: &CacheTokens) -> StoreResult<()> {
        sqlx::query("UPDATE sources SET etag = $2, last_modified = $3 WHERE id = $1")
            .bind(id)
            .bind(&tokens.etag)
            .bind(&tokens.last_modified)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_source(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sources SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "source", id: id.to_string() });
        }
        Ok(())
    }

    async fn upsert_creator(&self, creator: NewCreator) -> StoreResult<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO creators (id, source_type, external_id, name, description, profile_url, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_type, external_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                description = COALESCE(EXCLUDED.description, creators.description),
                profile_url = COALESCE(EXCLUDED.profile_url, creators.profile_url),
                metadata = CASE WHEN EXCLUDED.metadata = 'null'::jsonb THEN creators.metadata ELSE EXCLUDED.metadata END,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(creator.source_type.as_str())
        .bind(&creator.external_id)
        .bind(&creator.name)
        .bind(&creator.description)
        .bind(&creator.profile_url)
        .bind(&creator.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn get_creator(&self, id: Uuid) -> StoreResult<Option<Creator>> {
        let row = sqlx::query(
            "SELECT id, source_type, external_id, name, description, profile_url, metadata, created_at, updated_at \
             FROM creators WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(creator_from_row).transpose()
    }

    async fn find_content_by_hash(&self, source_type: SourceType, hash: &str) -> StoreResult<Option<ContentItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE source_type = $1 AND content_hash = $2",
            CONTENT_COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn find_content_by_external_id(
        &self,
        source_type: SourceType,
        external_id: &str,
    ) -> StoreResult<Option<ContentItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE source_type = $1 AND external_id = $2",
            CONTENT_COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn insert_content(&self, item: NewContentItem) -> StoreResult<ContentItem> {
        let external_id = item.external_id.clone();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO content_items
                (id, creator_id, source_type, external_id, title, description, url, author, body, published_at, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            CONTENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(item.creator_id)
        .bind(item.source_type.as_str())
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.url)
        .bind(&item.author)
        .bind(&item.body)
        .bind(item.published_at)
        .bind(&item.content_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("content {} already stored", external_id)))?;
        content_from_row(&row)
    }

    async fn update_content(&self, id: Uuid, edit: ContentEdit) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET title = $2, description = $3, body = $4, content_hash = $5, edited = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&edit.title)
        .bind(&edit.description)
        .bind(&edit.body)
        .bind(&edit.content_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("hash {} already stored", edit.content_hash)))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "content", id: id.to_string() });
        }
        Ok(())
    }

    async fn is_message_processed(&self, message_id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM processed_messages WHERE message_id = $1")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")? > 0)
    }

    async fn record_processed_message(
        &self,
        message_id: &str,
        content_hash: Option<&str>,
        content_id: Option<Uuid>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_messages (message_id, content_hash, content_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(content_hash)
        .bind(content_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_processed_message(&self, message_id: &str) -> StoreResult<Option<ProcessedMessage>> {
        let row = sqlx::query(
            "SELECT message_id, content_hash, content_id, processed_at FROM processed_messages WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(ProcessedMessage {
                message_id: r.try_get("message_id")?,
                content_hash: r.try_get("content_hash")?,
                content_id: r.try_get("content_id")?,
                processed_at: r.try_get("processed_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn count_content(&self, source_type: SourceType) -> StoreResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM content_items WHERE source_type = $1")
            .bind(source_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")? as usize)
    }
}
