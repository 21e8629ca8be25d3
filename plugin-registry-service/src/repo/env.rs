use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Database, Pool};

use crate::model::EnvEntry;
use crate::repo::RepoError;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EnvRecord {
    pub name: String,
    pub value: String,
}

impl From<EnvRecord> for EnvEntry {
    fn from(record: EnvRecord) -> Self {
        EnvEntry {
            name: record.name,
            value: record.value,
        }
    }
}

#[async_trait]
pub trait EnvRepo: Send + Sync {
    /// Creates a new entry, failing with a unique violation when the name is
    /// taken.
    async fn create(&self, name: &str, value: &str) -> Result<(), RepoError>;

    /// Creates or replaces the entry.
    async fn upsert(&self, name: &str, value: &str) -> Result<(), RepoError>;

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>, RepoError>;

    async fn list(&self) -> Result<Vec<EnvRecord>, RepoError>;

    async fn delete(&self, name: &str) -> Result<bool, RepoError>;
}

pub struct DbEnvRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbEnvRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl EnvRepo for DbEnvRepo<sqlx::Postgres> {
    async fn create(&self, name: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO env (name, value) VALUES ($1, $2)")
            .bind(name)
            .bind(value)
            .execute(self.db_pool.deref())
            .await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO env (name, value) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET value = $2",
        )
        .bind(name)
        .bind(value)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>, RepoError> {
        sqlx::query_as("SELECT name, value FROM env WHERE name = $1")
            .bind(name)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<EnvRecord>, RepoError> {
        sqlx::query_as("SELECT name, value FROM env ORDER BY name")
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, name: &str) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM env WHERE name = $1")
            .bind(name)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EnvRepo for DbEnvRepo<sqlx::Sqlite> {
    async fn create(&self, name: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO env (name, value) VALUES ($1, $2)")
            .bind(name)
            .bind(value)
            .execute(self.db_pool.deref())
            .await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO env (name, value) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET value = $2",
        )
        .bind(name)
        .bind(value)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>, RepoError> {
        sqlx::query_as("SELECT name, value FROM env WHERE name = $1")
            .bind(name)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<EnvRecord>, RepoError> {
        sqlx::query_as("SELECT name, value FROM env ORDER BY name")
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, name: &str) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM env WHERE name = $1")
            .bind(name)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
