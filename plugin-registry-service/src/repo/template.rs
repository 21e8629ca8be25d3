use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Database, Pool, QueryBuilder, Transaction};

use crate::model::{Template, TemplateTab};
use crate::repo::RepoError;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct TemplateRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
}

impl TemplateRecord {
    pub fn into_model(self, tags: Vec<String>) -> Template {
        Template {
            id: self.id,
            name: self.name,
            description: self.description,
            tags,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct TemplateTabRecord {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    pub location: String,
    pub icon: Option<String>,
    pub group_key: Option<String>,
    pub filter_string: String,
}

impl From<TemplateTabRecord> for TemplateTab {
    fn from(record: TemplateTabRecord) -> Self {
        TemplateTab {
            id: record.id,
            template_id: record.template_id,
            name: record.name,
            description: record.description,
            sort_key: record.sort_key,
            location: record.location,
            icon: record.icon,
            group_key: record.group_key,
            filter_string: record.filter_string,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateInsert {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TabInsert {
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    pub location: String,
    pub icon: Option<String>,
    pub group_key: Option<String>,
    pub filter_string: String,
}

const TAB_COLUMNS: &str = "id, template_id, name, description, sort_key, location, icon, \
     group_key, filter_string";

#[async_trait]
pub trait TemplateRepo: Send + Sync {
    async fn create_template(&self, template: &TemplateInsert) -> Result<i64, RepoError>;

    async fn get_template(&self, id: i64) -> Result<Option<TemplateRecord>, RepoError>;

    async fn get_template_by_name(&self, name: &str)
    -> Result<Option<TemplateRecord>, RepoError>;

    async fn list_templates(&self) -> Result<Vec<TemplateRecord>, RepoError>;

    async fn update_template(&self, id: i64, template: &TemplateInsert)
    -> Result<bool, RepoError>;

    async fn delete_template(&self, id: i64) -> Result<bool, RepoError>;

    async fn template_tags(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>, RepoError>;

    async fn create_tab(&self, template_id: i64, tab: &TabInsert) -> Result<i64, RepoError>;

    async fn get_tab(&self, id: i64) -> Result<Option<TemplateTabRecord>, RepoError>;

    /// Tabs of a template ordered by sort key, optionally restricted to a
    /// group location.
    async fn list_tabs(
        &self,
        template_id: i64,
        location: Option<&str>,
    ) -> Result<Vec<TemplateTabRecord>, RepoError>;

    async fn all_tabs(&self) -> Result<Vec<TemplateTabRecord>, RepoError>;

    async fn update_tab(&self, id: i64, tab: &TabInsert) -> Result<bool, RepoError>;

    async fn delete_tab(&self, id: i64) -> Result<bool, RepoError>;

    /// Replaces the materialized plugin membership of a tab.
    async fn set_tab_plugins(&self, tab_id: i64, plugin_ids: &[i64]) -> Result<(), RepoError>;

    async fn tab_plugin_ids(&self, tab_id: i64) -> Result<Vec<i64>, RepoError>;
}

pub struct DbTemplateRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbTemplateRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

macro_rules! template_repo_impl {
    ($db:ty) => {
        #[async_trait]
        impl TemplateRepo for DbTemplateRepo<$db> {
            async fn create_template(&self, template: &TemplateInsert) -> Result<i64, RepoError> {
                let mut tx = self.db_pool.begin().await?;
                let template_id: i64 = sqlx::query_scalar(
                    "INSERT INTO templates (name, description) VALUES ($1, $2) RETURNING id",
                )
                .bind(&template.name)
                .bind(&template.description)
                .fetch_one(&mut *tx)
                .await?;
                Self::replace_tags(&mut tx, template_id, &template.tags).await?;
                tx.commit().await?;
                Ok(template_id)
            }

            async fn get_template(&self, id: i64) -> Result<Option<TemplateRecord>, RepoError> {
                sqlx::query_as("SELECT id, name, description FROM templates WHERE id = $1")
                    .bind(id)
                    .fetch_optional(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn get_template_by_name(
                &self,
                name: &str,
            ) -> Result<Option<TemplateRecord>, RepoError> {
                // template names are not unique, lookups assume the first match
                sqlx::query_as(
                    "SELECT id, name, description FROM templates WHERE name = $1 \
                     ORDER BY id LIMIT 1",
                )
                .bind(name)
                .fetch_optional(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn list_templates(&self) -> Result<Vec<TemplateRecord>, RepoError> {
                sqlx::query_as("SELECT id, name, description FROM templates ORDER BY id")
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn update_template(
                &self,
                id: i64,
                template: &TemplateInsert,
            ) -> Result<bool, RepoError> {
                let mut tx = self.db_pool.begin().await?;
                let result = sqlx::query(
                    "UPDATE templates SET name = $1, description = $2 WHERE id = $3",
                )
                .bind(&template.name)
                .bind(&template.description)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Ok(false);
                }
                sqlx::query("DELETE FROM template_tags WHERE template_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                Self::replace_tags(&mut tx, id, &template.tags).await?;
                tx.commit().await?;
                Ok(true)
            }

            async fn delete_template(&self, id: i64) -> Result<bool, RepoError> {
                let result = sqlx::query("DELETE FROM templates WHERE id = $1")
                    .bind(id)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(result.rows_affected() > 0)
            }

            async fn template_tags(
                &self,
                ids: &[i64],
            ) -> Result<HashMap<i64, Vec<String>>, RepoError> {
                if ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let mut builder: QueryBuilder<$db> = QueryBuilder::new(
                    "SELECT template_tags.template_id, tags.name FROM template_tags \
                     JOIN tags ON tags.id = template_tags.tag_id \
                     WHERE template_tags.template_id IN (",
                );
                {
                    let mut separated = builder.separated(", ");
                    for id in ids {
                        separated.push_bind(*id);
                    }
                }
                builder.push(") ORDER BY tags.name");
                let rows: Vec<(i64, String)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
                for (template_id, name) in rows {
                    tags.entry(template_id).or_default().push(name);
                }
                Ok(tags)
            }

            async fn create_tab(&self, template_id: i64, tab: &TabInsert) -> Result<i64, RepoError> {
                sqlx::query_scalar(
                    "INSERT INTO template_tabs \
                     (template_id, name, description, sort_key, location, icon, group_key, filter_string) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
                )
                .bind(template_id)
                .bind(&tab.name)
                .bind(&tab.description)
                .bind(tab.sort_key)
                .bind(&tab.location)
                .bind(&tab.icon)
                .bind(&tab.group_key)
                .bind(&tab.filter_string)
                .fetch_one(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn get_tab(&self, id: i64) -> Result<Option<TemplateTabRecord>, RepoError> {
                sqlx::query_as(&format!(
                    "SELECT {TAB_COLUMNS} FROM template_tabs WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn list_tabs(
                &self,
                template_id: i64,
                location: Option<&str>,
            ) -> Result<Vec<TemplateTabRecord>, RepoError> {
                match location {
                    Some(location) => sqlx::query_as(&format!(
                        "SELECT {TAB_COLUMNS} FROM template_tabs \
                         WHERE template_id = $1 AND location = $2 ORDER BY sort_key, id"
                    ))
                    .bind(template_id)
                    .bind(location)
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into()),
                    None => sqlx::query_as(&format!(
                        "SELECT {TAB_COLUMNS} FROM template_tabs \
                         WHERE template_id = $1 ORDER BY sort_key, id"
                    ))
                    .bind(template_id)
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into()),
                }
            }

            async fn all_tabs(&self) -> Result<Vec<TemplateTabRecord>, RepoError> {
                sqlx::query_as(&format!("SELECT {TAB_COLUMNS} FROM template_tabs ORDER BY id"))
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn update_tab(&self, id: i64, tab: &TabInsert) -> Result<bool, RepoError> {
                let result = sqlx::query(
                    "UPDATE template_tabs SET name = $1, description = $2, sort_key = $3, \
                     location = $4, icon = $5, group_key = $6, filter_string = $7 WHERE id = $8",
                )
                .bind(&tab.name)
                .bind(&tab.description)
                .bind(tab.sort_key)
                .bind(&tab.location)
                .bind(&tab.icon)
                .bind(&tab.group_key)
                .bind(&tab.filter_string)
                .bind(id)
                .execute(self.db_pool.deref())
                .await?;
                Ok(result.rows_affected() > 0)
            }

            async fn delete_tab(&self, id: i64) -> Result<bool, RepoError> {
                let result = sqlx::query("DELETE FROM template_tabs WHERE id = $1")
                    .bind(id)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(result.rows_affected() > 0)
            }

            async fn set_tab_plugins(
                &self,
                tab_id: i64,
                plugin_ids: &[i64],
            ) -> Result<(), RepoError> {
                let mut tx = self.db_pool.begin().await?;
                sqlx::query("DELETE FROM tab_plugins WHERE tab_id = $1")
                    .bind(tab_id)
                    .execute(&mut *tx)
                    .await?;
                for plugin_id in plugin_ids {
                    sqlx::query(
                        "INSERT INTO tab_plugins (tab_id, plugin_id) VALUES ($1, $2) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(tab_id)
                    .bind(*plugin_id)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                Ok(())
            }

            async fn tab_plugin_ids(&self, tab_id: i64) -> Result<Vec<i64>, RepoError> {
                sqlx::query_scalar(
                    "SELECT plugin_id FROM tab_plugins WHERE tab_id = $1 ORDER BY plugin_id",
                )
                .bind(tab_id)
                .fetch_all(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }
        }

        impl DbTemplateRepo<$db> {
            async fn replace_tags(
                tx: &mut Transaction<'_, $db>,
                template_id: i64,
                tags: &[String],
            ) -> Result<(), RepoError> {
                for tag in tags {
                    let existing: Option<i64> =
                        sqlx::query_scalar("SELECT id FROM tags WHERE name = $1")
                            .bind(tag)
                            .fetch_optional(&mut **tx)
                            .await?;
                    let tag_id = match existing {
                        Some(id) => id,
                        None => {
                            sqlx::query_scalar(
                                "INSERT INTO tags (name, description) VALUES ($1, '') RETURNING id",
                            )
                            .bind(tag)
                            .fetch_one(&mut **tx)
                            .await?
                        }
                    };
                    sqlx::query(
                        "INSERT INTO template_tags (template_id, tag_id) VALUES ($1, $2) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(template_id)
                    .bind(tag_id)
                    .execute(&mut **tx)
                    .await?;
                }
                Ok(())
            }
        }
    };
}

template_repo_impl!(sqlx::Postgres);
template_repo_impl!(sqlx::Sqlite);
