//! Queue persistence
//!
//! Pending queue contents are mirrored to SQLite so a host restart can put
//! channels back where they were. The in-memory queue is authoritative; every
//! write here is best-effort and the caller decides whether a failure matters.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use chanter_common::{ChannelId, Error, Result};

use crate::playback::QueueItem;

/// Open (and create if needed) the queue database at `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Config(format!("invalid database URL: {e}")))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    info!(database_url, "queue database ready");
    Ok(pool)
}

/// Create the queue table if it does not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            guid TEXT PRIMARY KEY,
            channel_id INTEGER NOT NULL,
            source_ref TEXT NOT NULL,
            stream_url TEXT,
            source_id TEXT,
            title TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            duration_secs INTEGER,
            enqueued_at TEXT NOT NULL,
            play_order INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert one pending item at the given play order.
pub async fn insert_item(
    pool: &SqlitePool,
    channel: ChannelId,
    item: &QueueItem,
    play_order: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO queue_items
            (guid, channel_id, source_ref, stream_url, source_id, title,
             requested_by, duration_secs, enqueued_at, play_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.guid.to_string())
    .bind(channel.as_u64() as i64)
    .bind(&item.source_ref)
    .bind(&item.stream_url)
    .bind(&item.source_id)
    .bind(&item.title)
    .bind(&item.requested_by)
    .bind(item.duration_secs.map(|d| d as i64))
    .bind(item.enqueued_at.to_rfc3339())
    .bind(play_order)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove one item by GUID.
pub async fn delete_item(pool: &SqlitePool, guid: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM queue_items WHERE guid = ?")
        .bind(guid.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Remove every pending item for a channel.
pub async fn clear_channel(pool: &SqlitePool, channel: ChannelId) -> Result<()> {
    sqlx::query("DELETE FROM queue_items WHERE channel_id = ?")
        .bind(channel.as_u64() as i64)
        .execute(pool)
        .await?;

    Ok(())
}

/// Load a channel's pending items in play order.
pub async fn load_channel(pool: &SqlitePool, channel: ChannelId) -> Result<Vec<QueueItem>> {
    let rows: Vec<(
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
        Option<i64>,
        String,
    )> = sqlx::query_as(
        r#"
        SELECT guid, source_ref, stream_url, source_id, title,
               requested_by, duration_secs, enqueued_at
        FROM queue_items
        WHERE channel_id = ?
        ORDER BY play_order ASC
        "#,
    )
    .bind(channel.as_u64() as i64)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for (guid, source_ref, stream_url, source_id, title, requested_by, duration, enqueued) in rows {
        let guid = Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("corrupt queue row guid: {e}")))?;
        let enqueued_at = chrono::DateTime::parse_from_rfc3339(&enqueued)
            .map_err(|e| Error::Internal(format!("corrupt queue row timestamp: {e}")))?
            .with_timezone(&chrono::Utc);

        items.push(QueueItem {
            guid,
            source_ref,
            stream_url,
            source_id,
            title,
            requested_by,
            duration_secs: duration.map(|d| d as u64),
            enqueued_at,
            started_at: None,
        });
    }

    Ok(items)
}

/// Replace a channel's persisted pending list with `items`, in order.
///
/// Used after shuffle, where individual row updates would be racy against a
/// concurrent restore.
pub async fn replace_channel(
    pool: &SqlitePool,
    channel: ChannelId,
    items: &[QueueItem],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM queue_items WHERE channel_id = ?")
        .bind(channel.as_u64() as i64)
        .execute(&mut *tx)
        .await?;

    for (i, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO queue_items
                (guid, channel_id, source_ref, stream_url, source_id, title,
                 requested_by, duration_secs, enqueued_at, play_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.guid.to_string())
        .bind(channel.as_u64() as i64)
        .bind(&item.source_ref)
        .bind(&item.stream_url)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.requested_by)
        .bind(item.duration_secs.map(|d| d as i64))
        .bind(item.enqueued_at.to_rfc3339())
        .bind(((i as i64) + 1) * 10)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
