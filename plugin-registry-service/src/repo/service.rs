use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Database, Pool};

use crate::model::ServiceDescription;
use crate::repo::RepoError;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ServiceRecord {
    pub id: i64,
    pub service_id: String,
    pub url: String,
    pub name: String,
    pub description: String,
}

impl From<ServiceRecord> for ServiceDescription {
    fn from(record: ServiceRecord) -> Self {
        ServiceDescription {
            id: record.id,
            service_id: record.service_id,
            url: record.url,
            name: record.name,
            description: record.description,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceInsert {
    pub service_id: String,
    pub url: String,
    pub name: String,
    pub description: String,
}

#[async_trait]
pub trait ServiceRepo: Send + Sync {
    async fn create(&self, service: &ServiceInsert) -> Result<i64, RepoError>;

    /// Creates or updates the record with the given `service_id`.
    async fn upsert(&self, service: &ServiceInsert) -> Result<i64, RepoError>;

    async fn get(&self, id: i64) -> Result<Option<ServiceRecord>, RepoError>;

    async fn get_by_service_id(&self, service_id: &str)
    -> Result<Option<ServiceRecord>, RepoError>;

    async fn list(&self) -> Result<Vec<ServiceRecord>, RepoError>;

    async fn delete(&self, id: i64) -> Result<bool, RepoError>;
}

pub struct DbServiceRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbServiceRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

const SERVICE_COLUMNS: &str = "id, service_id, url, name, description";

#[async_trait]
impl ServiceRepo for DbServiceRepo<sqlx::Postgres> {
    async fn create(&self, service: &ServiceInsert) -> Result<i64, RepoError> {
        sqlx::query_scalar(
            "INSERT INTO services (service_id, url, name, description) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&service.service_id)
        .bind(&service.url)
        .bind(&service.name)
        .bind(&service.description)
        .fetch_one(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn upsert(&self, service: &ServiceInsert) -> Result<i64, RepoError> {
        sqlx::query_scalar(
            "INSERT INTO services (service_id, url, name, description) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (service_id) DO UPDATE \
             SET url = $2, name = $3, description = $4 RETURNING id",
        )
        .bind(&service.service_id)
        .bind(&service.url)
        .bind(&service.name)
        .bind(&service.description)
        .fetch_one(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn get(&self, id: i64) -> Result<Option<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn get_by_service_id(
        &self,
        service_id: &str,
    ) -> Result<Option<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE service_id = $1"
        ))
        .bind(service_id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!("SELECT {SERVICE_COLUMNS} FROM services ORDER BY id"))
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ServiceRepo for DbServiceRepo<sqlx::Sqlite> {
    async fn create(&self, service: &ServiceInsert) -> Result<i64, RepoError> {
        sqlx::query_scalar(
            "INSERT INTO services (service_id, url, name, description) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&service.service_id)
        .bind(&service.url)
        .bind(&service.name)
        .bind(&service.description)
        .fetch_one(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn upsert(&self, service: &ServiceInsert) -> Result<i64, RepoError> {
        sqlx::query_scalar(
            "INSERT INTO services (service_id, url, name, description) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (service_id) DO UPDATE \
             SET url = $2, name = $3, description = $4 RETURNING id",
        )
        .bind(&service.service_id)
        .bind(&service.url)
        .bind(&service.name)
        .bind(&service.description)
        .fetch_one(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn get(&self, id: i64) -> Result<Option<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn get_by_service_id(
        &self,
        service_id: &str,
    ) -> Result<Option<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE service_id = $1"
        ))
        .bind(service_id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, RepoError> {
        sqlx::query_as(&format!("SELECT {SERVICE_COLUMNS} FROM services ORDER BY id"))
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
