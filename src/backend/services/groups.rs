//! Group-membership collaborator
//!
//! Resolves a group id to its member identities. Called once per group
//! message; the router fans out to every member except the sender.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::backend::error::BackendError;

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>, BackendError>;
}

#[derive(Debug, Default)]
pub struct InMemoryGroupDirectory {
    groups: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, group_id: &str, member: &str) {
        self.groups
            .write()
            .await
            .entry(group_id.to_string())
            .or_default()
            .insert(member.to_string());
    }

    pub async fn remove_member(&self, group_id: &str, member: &str) {
        if let Some(members) = self.groups.write().await.get_mut(group_id) {
            members.remove(member);
        }
    }
}

#[async_trait]
impl GroupDirectory for InMemoryGroupDirectory {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .groups
            .read()
            .await
            .get(group_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Postgres-backed directory over `group_members`
#[derive(Debug, Clone)]
pub struct PgGroupDirectory {
    pool: PgPool,
}

impl PgGroupDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupDirectory for PgGroupDirectory {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT member_id
            FROM group_members
            WHERE group_id = $1
            ORDER BY member_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("member_id")).collect())
    }
}
