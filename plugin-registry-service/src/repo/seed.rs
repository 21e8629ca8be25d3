use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Database, Pool};

use crate::model::Seed;
use crate::repo::RepoError;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct SeedRecord {
    pub id: i64,
    pub url: String,
}

impl From<SeedRecord> for Seed {
    fn from(record: SeedRecord) -> Self {
        Seed {
            id: record.id,
            url: record.url,
        }
    }
}

#[async_trait]
pub trait SeedRepo: Send + Sync {
    /// Creates a new seed, failing with a unique violation when the url is
    /// already registered.
    async fn create(&self, url: &str) -> Result<i64, RepoError>;

    async fn get(&self, id: i64) -> Result<Option<SeedRecord>, RepoError>;

    async fn get_by_url(&self, url: &str) -> Result<Option<SeedRecord>, RepoError>;

    async fn list(&self) -> Result<Vec<SeedRecord>, RepoError>;

    async fn delete(&self, id: i64) -> Result<bool, RepoError>;
}

pub struct DbSeedRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbSeedRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SeedRepo for DbSeedRepo<sqlx::Postgres> {
    async fn create(&self, url: &str) -> Result<i64, RepoError> {
        sqlx::query_scalar("INSERT INTO seeds (url) VALUES ($1) RETURNING id")
            .bind(url)
            .fetch_one(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get(&self, id: i64) -> Result<Option<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds WHERE url = $1")
            .bind(url)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds ORDER BY id")
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM seeds WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SeedRepo for DbSeedRepo<sqlx::Sqlite> {
    async fn create(&self, url: &str) -> Result<i64, RepoError> {
        sqlx::query_scalar("INSERT INTO seeds (url) VALUES ($1) RETURNING id")
            .bind(url)
            .fetch_one(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get(&self, id: i64) -> Result<Option<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds WHERE url = $1")
            .bind(url)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<SeedRecord>, RepoError> {
        sqlx::query_as("SELECT id, url FROM seeds ORDER BY id")
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM seeds WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
