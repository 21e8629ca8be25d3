use plugin_registry_common::SafeDisplay;

pub mod env;
pub mod pagination;
pub mod plugin;
pub mod seed;
pub mod service;
pub mod template;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),
    #[error("Database error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                RepoError::UniqueViolation(error.to_string())
            }
            _ => RepoError::Internal(error.to_string()),
        }
    }
}

impl SafeDisplay for RepoError {
    fn to_safe_string(&self) -> String {
        match self {
            RepoError::UniqueViolation(_) => "Entity already exists".to_string(),
            RepoError::Internal(_) => "Internal repository error".to_string(),
        }
    }
}
