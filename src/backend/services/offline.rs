//! Offline-message store
//!
//! Messages for targets without a presence bit are kept here with unread
//! status until the target lists and acknowledges them.
//!
//! Two implementations:
//! - `InMemoryOfflineStore` - used when no database is configured, and in tests
//! - `PgOfflineStore` - Postgres via sqlx, table `offline_messages`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::backend::error::BackendError;

/// Largest page `list_unread` returns
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Unread,
    Read,
}

impl MessageStatus {
    fn code(self) -> i16 {
        match self {
            Self::Unread => 0,
            Self::Read => 1,
        }
    }

    fn from_code(code: i16) -> Self {
        if code == 0 {
            Self::Unread
        } else {
            Self::Read
        }
    }
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineMessage {
    pub message_id: String,
    pub sender_id: String,
    pub target_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OfflineStore: Send + Sync {
    async fn persist_unread(
        &self,
        sender_id: &str,
        target_id: &str,
        content: &str,
        message_id: &str,
    ) -> Result<(), BackendError>;

    /// Unread messages for `target_id`, oldest first; `page` starts at 1
    async fn list_unread(
        &self,
        target_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<OfflineMessage>, BackendError>;

    /// Mark messages read, returning how many changed
    async fn mark_read(&self, target_id: &str, message_ids: &[String]) -> Result<u64, BackendError>;
}

fn page_bounds(page: u32, limit: u32) -> (usize, usize) {
    let limit = limit.clamp(1, MAX_PAGE_SIZE) as usize;
    let offset = (page.max(1) as usize - 1) * limit;
    (offset, limit)
}

#[derive(Debug, Default)]
pub struct InMemoryOfflineStore {
    messages: RwLock<Vec<OfflineMessage>>,
}

impl InMemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message regardless of status
    pub async fn all(&self) -> Vec<OfflineMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl OfflineStore for InMemoryOfflineStore {
    async fn persist_unread(
        &self,
        sender_id: &str,
        target_id: &str,
        content: &str,
        message_id: &str,
    ) -> Result<(), BackendError> {
        self.messages.write().await.push(OfflineMessage {
            message_id: message_id.to_string(),
            sender_id: sender_id.to_string(),
            target_id: target_id.to_string(),
            content: content.to_string(),
            status: MessageStatus::Unread,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_unread(
        &self,
        target_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<OfflineMessage>, BackendError> {
        let (offset, limit) = page_bounds(page, limit);
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.target_id == target_id && m.status == MessageStatus::Unread)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, target_id: &str, message_ids: &[String]) -> Result<u64, BackendError> {
        let mut updated = 0;
        for message in self.messages.write().await.iter_mut() {
            if message.target_id == target_id
                && message.status == MessageStatus::Unread
                && message_ids.contains(&message.message_id)
            {
                message.status = MessageStatus::Read;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgOfflineStore {
    pool: PgPool,
}

impl PgOfflineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OfflineStore for PgOfflineStore {
    async fn persist_unread(
        &self,
        sender_id: &str,
        target_id: &str,
        content: &str,
        message_id: &str,
    ) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO offline_messages (message_id, sender_id, target_id, content, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (message_id, target_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(sender_id)
        .bind(target_id)
        .bind(content)
        .bind(MessageStatus::Unread.code())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unread(
        &self,
        target_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<OfflineMessage>, BackendError> {
        let (offset, limit) = page_bounds(page, limit);
        let rows = sqlx::query(
            r#"
            SELECT message_id, sender_id, target_id, content, status, created_at
            FROM offline_messages
            WHERE target_id = $1 AND status = $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(target_id)
        .bind(MessageStatus::Unread.code())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OfflineMessage {
                message_id: row.get("message_id"),
                sender_id: row.get("sender_id"),
                target_id: row.get("target_id"),
                content: row.get("content"),
                status: MessageStatus::from_code(row.get("status")),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn mark_read(&self, target_id: &str, message_ids: &[String]) -> Result<u64, BackendError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE offline_messages
            SET status = $1
            WHERE target_id = $2 AND status = $3 AND message_id = ANY($4)
            "#,
        )
        .bind(MessageStatus::Read.code())
        .bind(target_id)
        .bind(MessageStatus::Unread.code())
        .bind(message_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
