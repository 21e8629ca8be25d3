use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Database, Encode, Pool, QueryBuilder, Transaction, Type};

use crate::model::version::version_sort_key;
use crate::model::{DataRelation, MimePattern, Plugin, PluginDependency};
use crate::repo::RepoError;
use crate::repo::pagination::{
    PageRequest, PaginationInfo, SURROUNDING_PAGES, digest_pages, order_by_clause,
};

const PLUGIN_COLUMNS: &str = "plugins.id, plugins.identifier, plugins.version, \
     plugins.sort_version, plugins.title, plugins.description, plugins.plugin_type, \
     plugins.url, plugins.entry_url, plugins.ui_url, plugins.schema, \
     plugins.last_available, plugins.seed_id";

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct PluginRecord {
    pub id: i64,
    pub identifier: String,
    pub version: String,
    pub sort_version: String,
    pub title: String,
    pub description: String,
    pub plugin_type: String,
    pub url: String,
    pub entry_url: String,
    pub ui_url: String,
    pub schema: String,
    pub last_available: DateTime<Utc>,
    pub seed_id: Option<i64>,
}

impl PluginRecord {
    pub fn full_id(&self) -> String {
        format!("{}@{}", self.identifier, self.version)
    }

    pub fn into_model(self, details: PluginDetails) -> Plugin {
        let schema = serde_json::from_str(&self.schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        Plugin {
            id: self.id,
            identifier: self.identifier,
            version: self.version,
            title: self.title,
            description: self.description,
            plugin_type: self.plugin_type,
            url: self.url,
            entry_url: self.entry_url,
            ui_url: self.ui_url,
            schema,
            last_available: self.last_available,
            seed_id: self.seed_id,
            tags: details.tags,
            data: details
                .data
                .into_iter()
                .filter_map(|data| {
                    let relation = DataRelation::parse(&data.record.relation)?;
                    Some(crate::model::IoData {
                        identifier: data.record.identifier,
                        required: data.record.required,
                        relation,
                        data_type: MimePattern {
                            start: data.record.data_type_start,
                            end: data.record.data_type_end,
                        },
                        content_types: data.content_types,
                    })
                })
                .collect(),
            dependencies: details
                .dependencies
                .into_iter()
                .map(DependencyDetails::into_model)
                .collect(),
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct IoDataRecord {
    pub id: i64,
    pub plugin_id: i64,
    pub identifier: String,
    pub required: bool,
    pub relation: String,
    pub data_type_start: String,
    pub data_type_end: String,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DependencyRecord {
    pub id: i64,
    pub plugin_id: i64,
    pub parameter: String,
    pub required: bool,
    pub target_identifier: Option<String>,
    pub target_version: Option<String>,
    pub target_type: Option<String>,
    pub best_match_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct IoDataDetails {
    pub record: IoDataRecord,
    pub content_types: Vec<MimePattern>,
}

#[derive(Debug, Clone)]
pub struct DependencyDetails {
    pub record: DependencyRecord,
    pub required_tags: Vec<String>,
    pub forbidden_tags: Vec<String>,
}

impl DependencyDetails {
    pub fn into_model(self) -> PluginDependency {
        PluginDependency {
            parameter: self.record.parameter,
            required: self.record.required,
            identifier: self.record.target_identifier,
            version: self.record.target_version,
            plugin_type: self.record.target_type,
            required_tags: self.required_tags,
            forbidden_tags: self.forbidden_tags,
            best_match_id: self.record.best_match_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginDetails {
    pub tags: Vec<String>,
    pub data: Vec<IoDataDetails>,
    pub dependencies: Vec<DependencyDetails>,
}

#[derive(Debug, Clone)]
pub struct PluginInsert {
    pub identifier: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub plugin_type: String,
    pub url: String,
    pub entry_url: String,
    pub ui_url: String,
    pub schema: String,
    pub last_available: DateTime<Utc>,
    pub seed_id: Option<i64>,
    pub tags: Vec<String>,
    pub data: Vec<IoDataInsert>,
    pub dependencies: Vec<DependencyInsert>,
}

#[derive(Debug, Clone)]
pub struct IoDataInsert {
    pub identifier: String,
    pub required: bool,
    pub relation: DataRelation,
    pub data_type: MimePattern,
    pub content_types: Vec<MimePattern>,
}

#[derive(Debug, Clone)]
pub struct DependencyInsert {
    pub parameter: String,
    pub required: bool,
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub plugin_type: Option<String>,
    pub required_tags: Vec<String>,
    pub forbidden_tags: Vec<String>,
}

/// Search criteria for catalog queries, combined with `AND`.
///
/// Tag and version criteria are pre-resolved by the service layer (tag names
/// to ids, version requirements to concrete version lists). `impossible`
/// forces an empty result, e.g. when an unknown required tag was requested.
#[derive(Debug, Clone, Default)]
pub struct PluginCriteria {
    pub ids: Option<Vec<i64>>,
    pub url: Option<String>,
    pub identifier: Option<String>,
    pub versions: Option<Vec<String>>,
    pub available_after: Option<DateTime<Utc>>,
    pub must_have_tag_ids: Vec<i64>,
    pub forbidden_tag_ids: Vec<i64>,
    pub input_data_type: Option<MimePattern>,
    pub input_content_type: Option<MimePattern>,
    pub template_tab: Option<i64>,
    pub plugin_type: Option<String>,
    pub impossible: bool,
}

#[async_trait]
pub trait PluginRepo: Send + Sync {
    async fn create(&self, plugin: &PluginInsert) -> Result<i64, RepoError>;

    async fn touch(&self, id: i64, last_available: DateTime<Utc>) -> Result<(), RepoError>;

    async fn get(&self, id: i64) -> Result<Option<PluginRecord>, RepoError>;

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<PluginRecord>, RepoError>;

    async fn get_by_identifier_and_version(
        &self,
        identifier: &str,
        version: &str,
    ) -> Result<Option<PluginRecord>, RepoError>;

    async fn delete(&self, id: i64) -> Result<bool, RepoError>;

    async fn delete_by_url(&self, url: &str) -> Result<u64, RepoError>;

    async fn versions_of(&self, identifier: &str) -> Result<Vec<String>, RepoError>;

    async fn count(&self) -> Result<i64, RepoError>;

    /// A stable slice of the plugin table ordered by id, used for batched
    /// filter evaluation.
    async fn batch(&self, offset: i64, limit: i64) -> Result<Vec<PluginRecord>, RepoError>;

    async fn find_page(
        &self,
        criteria: &PluginCriteria,
        page: &PageRequest,
    ) -> Result<(PaginationInfo, Vec<PluginRecord>), RepoError>;

    async fn tags_of_many(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>, RepoError>;

    async fn details_many(&self, ids: &[i64]) -> Result<HashMap<i64, PluginDetails>, RepoError>;

    /// Resolves tag names to ids; unknown names are missing from the result.
    async fn tag_ids(&self, names: &[String]) -> Result<HashMap<String, i64>, RepoError>;

    async fn max_last_available(&self) -> Result<Option<DateTime<Utc>>, RepoError>;

    /// Deletes all plugins whose `last_available` is strictly before the
    /// cutoff and returns how many were removed.
    async fn purge_unavailable_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepoError>;

    /// Vote query over required consumed data: for every plugin with at
    /// least one required consumed entry matching one of the given
    /// `(data type, content type)` items, returns
    /// `min(1, matched entries / required entries)`.
    async fn data_match_votes(
        &self,
        items: &[(MimePattern, MimePattern)],
    ) -> Result<Vec<(i64, f64)>, RepoError>;

    /// Plugins with at least one required consumed entry that cannot be
    /// satisfied from the available data (anti-join).
    async fn unmet_requirement_ids(
        &self,
        available: &[(MimePattern, Vec<MimePattern>)],
    ) -> Result<Vec<i64>, RepoError>;

    /// Plugins whose required consumed entries can all be satisfied from the
    /// available data.
    async fn satisfiable_ids(
        &self,
        available: &[(MimePattern, Vec<MimePattern>)],
    ) -> Result<Vec<i64>, RepoError>;

    /// Plugins whose type makes them inadmissible as a recommendation.
    async fn inadmissible_type_ids(&self) -> Result<Vec<i64>, RepoError>;

    /// `(id, identifier, version)` rows for all plugins with one of the
    /// given identifiers.
    async fn ids_by_identifiers(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<(i64, String, String)>, RepoError>;

    /// Plugins carrying every one of the given tags.
    async fn ids_with_all_tags(&self, tags: &[String]) -> Result<Vec<i64>, RepoError>;

    async fn all_dependencies(&self) -> Result<Vec<DependencyDetails>, RepoError>;

    /// Candidate plugins for dependency resolution, best version first.
    async fn candidates(
        &self,
        identifier: Option<&str>,
        plugin_type: Option<&str>,
    ) -> Result<Vec<PluginRecord>, RepoError>;

    async fn set_best_match(
        &self,
        dependency_id: i64,
        best_match_id: Option<i64>,
    ) -> Result<(), RepoError>;
}

pub struct DbPluginRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbPluginRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

// Query builders shared by the backend specific implementations.

fn push_mime_constraint<DB>(
    builder: &mut QueryBuilder<'_, DB>,
    start_column: &str,
    end_column: &str,
    pattern: &MimePattern,
) where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    if pattern.start != "*" {
        builder.push(format!(" AND ({start_column} = "));
        builder.push_bind(pattern.start.clone());
        builder.push(format!(" OR {start_column} = '*')"));
    }
    if pattern.end != "*" {
        builder.push(format!(" AND ({end_column} = "));
        builder.push_bind(pattern.end.clone());
        builder.push(format!(" OR {end_column} = '*')"));
    }
}

/// One `(data type, content type)` match condition against the io_data row
/// aliased `io`.
fn push_item_condition<DB>(
    builder: &mut QueryBuilder<'_, DB>,
    io_alias: &str,
    data_type: &MimePattern,
    content_type: &MimePattern,
) where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    builder.push("(1 = 1");
    push_mime_constraint(
        builder,
        &format!("{io_alias}.data_type_start"),
        &format!("{io_alias}.data_type_end"),
        data_type,
    );
    if content_type.start != "*" || content_type.end != "*" {
        builder.push(format!(
            " AND EXISTS (SELECT 1 FROM content_types ct WHERE ct.io_data_id = {io_alias}.id"
        ));
        push_mime_constraint(builder, "ct.content_type_start", "ct.content_type_end", content_type);
        builder.push(")");
    }
    builder.push(")");
}

/// Match condition for one available data entry (data type plus the list of
/// content types it is available as).
fn push_available_condition<DB>(
    builder: &mut QueryBuilder<'_, DB>,
    io_alias: &str,
    data_type: &MimePattern,
    content_types: &[MimePattern],
) where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    builder.push("(1 = 1");
    push_mime_constraint(
        builder,
        &format!("{io_alias}.data_type_start"),
        &format!("{io_alias}.data_type_end"),
        data_type,
    );
    let constrained: Vec<&MimePattern> = content_types
        .iter()
        .filter(|ct| ct.start != "*" || ct.end != "*")
        .collect();
    if !content_types.is_empty() && constrained.len() == content_types.len() {
        builder.push(format!(
            " AND EXISTS (SELECT 1 FROM content_types ct WHERE ct.io_data_id = {io_alias}.id AND ("
        ));
        for (i, content_type) in constrained.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push("(1 = 1");
            push_mime_constraint(builder, "ct.content_type_start", "ct.content_type_end", content_type);
            builder.push(")");
        }
        builder.push("))");
    }
    builder.push(")");
}

fn push_unmet_subquery<DB>(
    builder: &mut QueryBuilder<'_, DB>,
    available: &[(MimePattern, Vec<MimePattern>)],
) where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    builder.push(
        "SELECT DISTINCT io.plugin_id FROM io_data io \
         WHERE io.required = TRUE AND io.relation = 'consumed' AND io.id NOT IN (\
         SELECT io2.id FROM io_data io2 \
         WHERE io2.required = TRUE AND io2.relation = 'consumed' AND (",
    );
    if available.is_empty() {
        builder.push("1 = 0");
    } else {
        for (i, (data_type, content_types)) in available.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            push_available_condition(builder, "io2", data_type, content_types);
        }
    }
    builder.push("))");
}

fn push_criteria<DB>(builder: &mut QueryBuilder<'_, DB>, criteria: &PluginCriteria)
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    builder.push(" WHERE 1 = 1");
    if criteria.impossible {
        builder.push(" AND 1 = 0");
        return;
    }
    if let Some(ids) = &criteria.ids {
        if ids.is_empty() {
            builder.push(" AND 1 = 0");
        } else {
            builder.push(" AND plugins.id IN (");
            {
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(*id);
                }
            }
            builder.push(")");
        }
    }
    if let Some(url) = &criteria.url {
        builder.push(" AND plugins.url = ");
        builder.push_bind(url.clone());
    }
    if let Some(identifier) = &criteria.identifier {
        builder.push(" AND plugins.identifier = ");
        builder.push_bind(identifier.clone());
    }
    if let Some(versions) = &criteria.versions {
        if versions.is_empty() {
            builder.push(" AND 1 = 0");
        } else {
            builder.push(" AND plugins.version IN (");
            {
                let mut separated = builder.separated(", ");
                for version in versions {
                    separated.push_bind(version.clone());
                }
            }
            builder.push(")");
        }
    }
    if let Some(available_after) = criteria.available_after {
        builder.push(" AND plugins.last_available >= ");
        builder.push_bind(available_after);
    }
    if !criteria.must_have_tag_ids.is_empty() {
        builder.push(
            " AND plugins.id IN (SELECT plugin_tags.plugin_id FROM plugin_tags \
             WHERE plugin_tags.tag_id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for tag_id in &criteria.must_have_tag_ids {
                separated.push_bind(*tag_id);
            }
        }
        builder.push(") GROUP BY plugin_tags.plugin_id HAVING count(plugin_tags.tag_id) = ");
        builder.push_bind(criteria.must_have_tag_ids.len() as i64);
        builder.push(")");
    }
    if !criteria.forbidden_tag_ids.is_empty() {
        builder.push(
            " AND plugins.id NOT IN (SELECT DISTINCT plugin_tags.plugin_id FROM plugin_tags \
             WHERE plugin_tags.tag_id IN (",
        );
        {
            let mut separated = builder.separated(", ");
            for tag_id in &criteria.forbidden_tag_ids {
                separated.push_bind(*tag_id);
            }
        }
        builder.push("))");
    }
    if criteria.input_data_type.is_some() || criteria.input_content_type.is_some() {
        let data_type = criteria
            .input_data_type
            .clone()
            .unwrap_or_else(MimePattern::wildcard);
        let content_type = criteria
            .input_content_type
            .clone()
            .unwrap_or_else(MimePattern::wildcard);
        builder.push(
            " AND plugins.id IN (SELECT io.plugin_id FROM io_data io \
             WHERE io.relation = 'consumed' AND ",
        );
        push_item_condition(builder, "io", &data_type, &content_type);
        builder.push(")");
    }
    if let Some(tab_id) = criteria.template_tab {
        builder.push(
            " AND plugins.id IN (SELECT tab_plugins.plugin_id FROM tab_plugins \
             WHERE tab_plugins.tab_id = ",
        );
        builder.push_bind(tab_id);
        builder.push(")");
    }
    if let Some(plugin_type) = &criteria.plugin_type {
        builder.push(" AND plugins.plugin_type = ");
        builder.push_bind(plugin_type.clone());
    }
}

fn count_query<DB>(criteria: &PluginCriteria) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new("SELECT count(*) FROM plugins");
    push_criteria(&mut builder, criteria);
    builder
}

fn items_query<DB>(
    criteria: &PluginCriteria,
    order_by: &str,
    limit: i64,
    offset: i64,
) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(format!("SELECT {PLUGIN_COLUMNS} FROM plugins"));
    push_criteria(&mut builder, criteria);
    builder.push(format!(" ORDER BY {order_by} LIMIT "));
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);
    builder
}

fn ranked_cte<DB>(criteria: &PluginCriteria, order_by: &str) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(format!(
        "WITH ranked AS (SELECT plugins.id AS cid, \
         row_number() OVER (ORDER BY {order_by}) AS rn FROM plugins"
    ));
    push_criteria(&mut builder, criteria);
    builder.push(")");
    builder
}

fn cursor_row_query<DB>(
    criteria: &PluginCriteria,
    order_by: &str,
    cursor: i64,
) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let mut builder = ranked_cte(criteria, order_by);
    builder.push(" SELECT rn FROM ranked WHERE cid = ");
    builder.push_bind(cursor);
    builder
}

fn anchors_query<DB>(
    criteria: &PluginCriteria,
    order_by: &str,
    item_count: i64,
    cursor_row: i64,
) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let cursor_page = cursor_row / item_count;
    let mut builder = ranked_cte(criteria, order_by);
    builder.push(" SELECT cid, rn FROM ranked WHERE (rn % ");
    builder.push_bind(item_count);
    builder.push(") = ");
    builder.push_bind(cursor_row % item_count);
    builder.push(" AND ((rn / ");
    builder.push_bind(item_count);
    builder.push(") BETWEEN ");
    builder.push_bind(cursor_page - SURROUNDING_PAGES);
    builder.push(" AND ");
    builder.push_bind(cursor_page + SURROUNDING_PAGES);
    builder.push(" OR (rn / ");
    builder.push_bind(item_count);
    builder.push(") >= ((SELECT max(rn) FROM ranked) / ");
    builder.push_bind(item_count);
    builder.push(") - 1) ORDER BY rn");
    builder
}

fn data_match_votes_query<DB>(items: &[(MimePattern, MimePattern)]) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(
        "SELECT matched.plugin_id, matched.available, req.required_count FROM (\
         SELECT io.plugin_id AS plugin_id, count(DISTINCT io.id) AS available \
         FROM io_data io \
         WHERE io.required = TRUE AND io.relation = 'consumed' AND (",
    );
    if items.is_empty() {
        builder.push("1 = 0");
    } else {
        for (i, (data_type, content_type)) in items.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            push_item_condition(&mut builder, "io", data_type, content_type);
        }
    }
    builder.push(
        ") GROUP BY io.plugin_id) matched \
         LEFT JOIN (SELECT io_data.plugin_id AS plugin_id, count(*) AS required_count \
         FROM io_data WHERE io_data.required = TRUE AND io_data.relation = 'consumed' \
         GROUP BY io_data.plugin_id) req ON req.plugin_id = matched.plugin_id",
    );
    builder
}

fn unmet_ids_query<DB>(available: &[(MimePattern, Vec<MimePattern>)]) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new("");
    push_unmet_subquery(&mut builder, available);
    builder
}

fn satisfiable_ids_query<DB>(
    available: &[(MimePattern, Vec<MimePattern>)],
) -> QueryBuilder<'static, DB>
where
    DB: Database,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new("SELECT plugins.id FROM plugins WHERE plugins.id NOT IN (");
    push_unmet_subquery(&mut builder, available);
    builder.push(")");
    builder
}

fn in_list_query<DB, T>(prefix: &str, values: &[T], suffix: &str) -> QueryBuilder<'static, DB>
where
    DB: Database,
    T: Clone + Send + Sync + 'static,
    for<'q> T: Encode<'q, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(prefix.to_string());
    {
        let mut separated = builder.separated(", ");
        for value in values {
            separated.push_bind(value.clone());
        }
    }
    builder.push(suffix.to_string());
    builder
}

fn votes_from_rows(rows: Vec<(i64, i64, Option<i64>)>) -> Vec<(i64, f64)> {
    rows.into_iter()
        .map(|(plugin_id, available, required)| {
            let vote = match required {
                Some(required) if required > 0 => (available as f64 / required as f64).min(1.0),
                _ => 1.0,
            };
            (plugin_id, vote)
        })
        .collect()
}

macro_rules! plugin_repo_impl {
    ($db:ty) => {
        #[async_trait]
        impl PluginRepo for DbPluginRepo<$db> {
            async fn create(&self, plugin: &PluginInsert) -> Result<i64, RepoError> {
                let mut tx = self.db_pool.begin().await?;
                let plugin_id: i64 = sqlx::query_scalar(
                    "INSERT INTO plugins \
                     (identifier, version, sort_version, title, description, plugin_type, \
                      url, entry_url, ui_url, schema, last_available, seed_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING id",
                )
                .bind(&plugin.identifier)
                .bind(&plugin.version)
                .bind(version_sort_key(&plugin.version))
                .bind(&plugin.title)
                .bind(&plugin.description)
                .bind(&plugin.plugin_type)
                .bind(&plugin.url)
                .bind(&plugin.entry_url)
                .bind(&plugin.ui_url)
                .bind(&plugin.schema)
                .bind(plugin.last_available)
                .bind(plugin.seed_id)
                .fetch_one(&mut *tx)
                .await?;

                for tag in &plugin.tags {
                    let tag_id = Self::get_or_create_tag(&mut tx, tag).await?;
                    sqlx::query(
                        "INSERT INTO plugin_tags (plugin_id, tag_id) VALUES ($1, $2) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(plugin_id)
                    .bind(tag_id)
                    .execute(&mut *tx)
                    .await?;
                }

                for data in &plugin.data {
                    let io_data_id: i64 = sqlx::query_scalar(
                        "INSERT INTO io_data \
                         (plugin_id, identifier, required, relation, data_type_start, data_type_end) \
                         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                    )
                    .bind(plugin_id)
                    .bind(&data.identifier)
                    .bind(data.required)
                    .bind(data.relation.as_str())
                    .bind(&data.data_type.start)
                    .bind(&data.data_type.end)
                    .fetch_one(&mut *tx)
                    .await?;
                    for content_type in &data.content_types {
                        sqlx::query(
                            "INSERT INTO content_types \
                             (io_data_id, content_type_start, content_type_end) \
                             VALUES ($1, $2, $3)",
                        )
                        .bind(io_data_id)
                        .bind(&content_type.start)
                        .bind(&content_type.end)
                        .execute(&mut *tx)
                        .await?;
                    }
                }

                for dependency in &plugin.dependencies {
                    let dependency_id: i64 = sqlx::query_scalar(
                        "INSERT INTO dependencies \
                         (plugin_id, parameter, required, target_identifier, target_version, target_type) \
                         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                    )
                    .bind(plugin_id)
                    .bind(&dependency.parameter)
                    .bind(dependency.required)
                    .bind(&dependency.identifier)
                    .bind(&dependency.version)
                    .bind(&dependency.plugin_type)
                    .fetch_one(&mut *tx)
                    .await?;
                    let tags = dependency
                        .required_tags
                        .iter()
                        .map(|tag| (tag, false))
                        .chain(dependency.forbidden_tags.iter().map(|tag| (tag, true)));
                    for (tag, exclude) in tags {
                        let tag_id = Self::get_or_create_tag(&mut tx, tag).await?;
                        sqlx::query(
                            "INSERT INTO dependency_tags (dependency_id, tag_id, exclude) \
                             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                        )
                        .bind(dependency_id)
                        .bind(tag_id)
                        .bind(exclude)
                        .execute(&mut *tx)
                        .await?;
                    }
                }

                tx.commit().await?;
                Ok(plugin_id)
            }

            async fn touch(&self, id: i64, last_available: DateTime<Utc>) -> Result<(), RepoError> {
                sqlx::query("UPDATE plugins SET last_available = $1 WHERE id = $2")
                    .bind(last_available)
                    .bind(id)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(())
            }

            async fn get(&self, id: i64) -> Result<Option<PluginRecord>, RepoError> {
                sqlx::query_as::<_, PluginRecord>(&format!(
                    "SELECT {PLUGIN_COLUMNS} FROM plugins WHERE plugins.id = $1"
                ))
                .bind(id)
                .fetch_optional(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn get_many(&self, ids: &[i64]) -> Result<Vec<PluginRecord>, RepoError> {
                if ids.is_empty() {
                    return Ok(vec![]);
                }
                let mut builder = in_list_query::<$db, i64>(
                    &format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE plugins.id IN ("),
                    ids,
                    ")",
                );
                builder
                    .build_query_as::<PluginRecord>()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn get_by_identifier_and_version(
                &self,
                identifier: &str,
                version: &str,
            ) -> Result<Option<PluginRecord>, RepoError> {
                sqlx::query_as::<_, PluginRecord>(&format!(
                    "SELECT {PLUGIN_COLUMNS} FROM plugins \
                     WHERE plugins.identifier = $1 AND plugins.version = $2"
                ))
                .bind(identifier)
                .bind(version)
                .fetch_optional(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn delete(&self, id: i64) -> Result<bool, RepoError> {
                let result = sqlx::query("DELETE FROM plugins WHERE id = $1")
                    .bind(id)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(result.rows_affected() > 0)
            }

            async fn delete_by_url(&self, url: &str) -> Result<u64, RepoError> {
                let result = sqlx::query("DELETE FROM plugins WHERE url = $1")
                    .bind(url)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(result.rows_affected())
            }

            async fn versions_of(&self, identifier: &str) -> Result<Vec<String>, RepoError> {
                sqlx::query_scalar("SELECT version FROM plugins WHERE identifier = $1")
                    .bind(identifier)
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn count(&self) -> Result<i64, RepoError> {
                sqlx::query_scalar("SELECT count(*) FROM plugins")
                    .fetch_one(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn batch(&self, offset: i64, limit: i64) -> Result<Vec<PluginRecord>, RepoError> {
                sqlx::query_as::<_, PluginRecord>(&format!(
                    "SELECT {PLUGIN_COLUMNS} FROM plugins ORDER BY plugins.id LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn find_page(
                &self,
                criteria: &PluginCriteria,
                page: &PageRequest,
            ) -> Result<(PaginationInfo, Vec<PluginRecord>), RepoError> {
                let order_by = order_by_clause(&page.sort);

                let mut count_builder = count_query::<$db>(criteria);
                let collection_size: i64 = count_builder
                    .build_query_scalar()
                    .fetch_one(self.db_pool.deref())
                    .await?;

                // resolve the cursor, an unknown cursor counts as no cursor
                let cursor = match page.cursor {
                    Some(cursor) => sqlx::query_scalar::<_, i64>(
                        "SELECT id FROM plugins WHERE id = $1",
                    )
                    .bind(cursor)
                    .fetch_optional(self.db_pool.deref())
                    .await?,
                    None => None,
                };

                if collection_size <= page.item_count {
                    let mut builder =
                        items_query::<$db>(criteria, &order_by, page.item_count, 0);
                    let items = builder
                        .build_query_as::<PluginRecord>()
                        .fetch_all(self.db_pool.deref())
                        .await?;
                    return Ok((PaginationInfo::single_page(collection_size), items));
                }

                let cursor_row = match cursor {
                    Some(cursor) => {
                        let mut builder = cursor_row_query::<$db>(criteria, &order_by, cursor);
                        builder
                            .build_query_scalar::<i64>()
                            .fetch_optional(self.db_pool.deref())
                            .await?
                            .unwrap_or(0)
                    }
                    None => 0,
                };

                let mut builder =
                    anchors_query::<$db>(criteria, &order_by, page.item_count, cursor_row);
                let anchors: Vec<(i64, i64)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;

                let (surrounding_pages, last_page, cursor_row, cursor_page) = digest_pages(
                    &anchors,
                    cursor,
                    page.item_count,
                    SURROUNDING_PAGES,
                    collection_size,
                );

                let mut builder =
                    items_query::<$db>(criteria, &order_by, page.item_count, cursor_row);
                let items = builder
                    .build_query_as::<PluginRecord>()
                    .fetch_all(self.db_pool.deref())
                    .await?;

                Ok((
                    PaginationInfo {
                        collection_size,
                        cursor_row,
                        cursor_page,
                        surrounding_pages,
                        last_page,
                    },
                    items,
                ))
            }

            async fn tags_of_many(
                &self,
                ids: &[i64],
            ) -> Result<HashMap<i64, Vec<String>>, RepoError> {
                if ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let mut builder = in_list_query::<$db, i64>(
                    "SELECT plugin_tags.plugin_id, tags.name FROM plugin_tags \
                     JOIN tags ON tags.id = plugin_tags.tag_id \
                     WHERE plugin_tags.plugin_id IN (",
                    ids,
                    ") ORDER BY tags.name",
                );
                let rows: Vec<(i64, String)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
                for (plugin_id, name) in rows {
                    tags.entry(plugin_id).or_default().push(name);
                }
                Ok(tags)
            }

            async fn details_many(
                &self,
                ids: &[i64],
            ) -> Result<HashMap<i64, PluginDetails>, RepoError> {
                if ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let mut details: HashMap<i64, PluginDetails> = HashMap::new();

                for (plugin_id, tags) in self.tags_of_many(ids).await? {
                    details.entry(plugin_id).or_default().tags = tags;
                }

                let mut builder = in_list_query::<$db, i64>(
                    "SELECT id, plugin_id, identifier, required, relation, \
                     data_type_start, data_type_end FROM io_data WHERE plugin_id IN (",
                    ids,
                    ") ORDER BY id",
                );
                let io_rows: Vec<IoDataRecord> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;

                let io_ids: Vec<i64> = io_rows.iter().map(|row| row.id).collect();
                let mut content_types: HashMap<i64, Vec<MimePattern>> = HashMap::new();
                if !io_ids.is_empty() {
                    let mut builder = in_list_query::<$db, i64>(
                        "SELECT io_data_id, content_type_start, content_type_end \
                         FROM content_types WHERE io_data_id IN (",
                        &io_ids,
                        ") ORDER BY id",
                    );
                    let rows: Vec<(i64, String, String)> = builder
                        .build_query_as()
                        .fetch_all(self.db_pool.deref())
                        .await?;
                    for (io_data_id, start, end) in rows {
                        content_types
                            .entry(io_data_id)
                            .or_default()
                            .push(MimePattern { start, end });
                    }
                }
                for record in io_rows {
                    let content_types = content_types.remove(&record.id).unwrap_or_default();
                    details
                        .entry(record.plugin_id)
                        .or_default()
                        .data
                        .push(IoDataDetails {
                            record,
                            content_types,
                        });
                }

                let mut builder = in_list_query::<$db, i64>(
                    "SELECT id, plugin_id, parameter, required, target_identifier, \
                     target_version, target_type, best_match_id FROM dependencies \
                     WHERE plugin_id IN (",
                    ids,
                    ") ORDER BY id",
                );
                let dependency_rows: Vec<DependencyRecord> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                let dependency_tags = self
                    .dependency_tags(&dependency_rows.iter().map(|d| d.id).collect::<Vec<_>>())
                    .await?;
                for record in dependency_rows {
                    let (required_tags, forbidden_tags) = dependency_tags
                        .get(&record.id)
                        .cloned()
                        .unwrap_or_default();
                    details
                        .entry(record.plugin_id)
                        .or_default()
                        .dependencies
                        .push(DependencyDetails {
                            record,
                            required_tags,
                            forbidden_tags,
                        });
                }

                Ok(details)
            }

            async fn tag_ids(&self, names: &[String]) -> Result<HashMap<String, i64>, RepoError> {
                if names.is_empty() {
                    return Ok(HashMap::new());
                }
                let mut builder = in_list_query::<$db, String>(
                    "SELECT name, id FROM tags WHERE name IN (",
                    names,
                    ")",
                );
                let rows: Vec<(String, i64)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                Ok(rows.into_iter().collect())
            }

            async fn max_last_available(&self) -> Result<Option<DateTime<Utc>>, RepoError> {
                sqlx::query_scalar("SELECT max(last_available) FROM plugins")
                    .fetch_one(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn purge_unavailable_before(
                &self,
                cutoff: DateTime<Utc>,
            ) -> Result<u64, RepoError> {
                let result = sqlx::query("DELETE FROM plugins WHERE last_available < $1")
                    .bind(cutoff)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(result.rows_affected())
            }

            async fn data_match_votes(
                &self,
                items: &[(MimePattern, MimePattern)],
            ) -> Result<Vec<(i64, f64)>, RepoError> {
                let mut builder = data_match_votes_query::<$db>(items);
                let rows: Vec<(i64, i64, Option<i64>)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                Ok(votes_from_rows(rows))
            }

            async fn unmet_requirement_ids(
                &self,
                available: &[(MimePattern, Vec<MimePattern>)],
            ) -> Result<Vec<i64>, RepoError> {
                let mut builder = unmet_ids_query::<$db>(available);
                builder
                    .build_query_scalar()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn satisfiable_ids(
                &self,
                available: &[(MimePattern, Vec<MimePattern>)],
            ) -> Result<Vec<i64>, RepoError> {
                let mut builder = satisfiable_ids_query::<$db>(available);
                builder
                    .build_query_scalar()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn inadmissible_type_ids(&self) -> Result<Vec<i64>, RepoError> {
                sqlx::query_scalar(
                    "SELECT id FROM plugins \
                     WHERE plugin_type <> 'processing' AND plugin_type <> 'conversion'",
                )
                .fetch_all(self.db_pool.deref())
                .await
                .map_err(|e| e.into())
            }

            async fn ids_by_identifiers(
                &self,
                identifiers: &[String],
            ) -> Result<Vec<(i64, String, String)>, RepoError> {
                if identifiers.is_empty() {
                    return Ok(vec![]);
                }
                let mut builder = in_list_query::<$db, String>(
                    "SELECT id, identifier, version FROM plugins WHERE identifier IN (",
                    identifiers,
                    ")",
                );
                builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn ids_with_all_tags(&self, tags: &[String]) -> Result<Vec<i64>, RepoError> {
                if tags.is_empty() {
                    return Ok(vec![]);
                }
                let mut builder = in_list_query::<$db, String>(
                    "SELECT plugin_tags.plugin_id FROM plugin_tags \
                     JOIN tags ON tags.id = plugin_tags.tag_id WHERE tags.name IN (",
                    tags,
                    ") GROUP BY plugin_tags.plugin_id HAVING count(plugin_tags.tag_id) = ",
                );
                builder.push_bind(tags.len() as i64);
                builder
                    .build_query_scalar()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn all_dependencies(&self) -> Result<Vec<DependencyDetails>, RepoError> {
                let dependency_rows: Vec<DependencyRecord> = sqlx::query_as(
                    "SELECT id, plugin_id, parameter, required, target_identifier, \
                     target_version, target_type, best_match_id FROM dependencies ORDER BY id",
                )
                .fetch_all(self.db_pool.deref())
                .await?;
                let dependency_tags = self
                    .dependency_tags(&dependency_rows.iter().map(|d| d.id).collect::<Vec<_>>())
                    .await?;
                Ok(dependency_rows
                    .into_iter()
                    .map(|record| {
                        let (required_tags, forbidden_tags) = dependency_tags
                            .get(&record.id)
                            .cloned()
                            .unwrap_or_default();
                        DependencyDetails {
                            record,
                            required_tags,
                            forbidden_tags,
                        }
                    })
                    .collect())
            }

            async fn candidates(
                &self,
                identifier: Option<&str>,
                plugin_type: Option<&str>,
            ) -> Result<Vec<PluginRecord>, RepoError> {
                let mut builder: QueryBuilder<$db> =
                    QueryBuilder::new(format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE 1 = 1"));
                if let Some(identifier) = identifier {
                    builder.push(" AND plugins.identifier = ");
                    builder.push_bind(identifier.to_string());
                }
                if let Some(plugin_type) = plugin_type {
                    builder.push(" AND plugins.plugin_type = ");
                    builder.push_bind(plugin_type.to_string());
                }
                builder.push(" ORDER BY plugins.sort_version DESC, plugins.id DESC");
                builder
                    .build_query_as::<PluginRecord>()
                    .fetch_all(self.db_pool.deref())
                    .await
                    .map_err(|e| e.into())
            }

            async fn set_best_match(
                &self,
                dependency_id: i64,
                best_match_id: Option<i64>,
            ) -> Result<(), RepoError> {
                sqlx::query("UPDATE dependencies SET best_match_id = $1 WHERE id = $2")
                    .bind(best_match_id)
                    .bind(dependency_id)
                    .execute(self.db_pool.deref())
                    .await?;
                Ok(())
            }
        }

        impl DbPluginRepo<$db> {
            async fn get_or_create_tag(
                tx: &mut Transaction<'_, $db>,
                name: &str,
            ) -> Result<i64, RepoError> {
                let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&mut **tx)
                    .await?;
                if let Some(id) = existing {
                    return Ok(id);
                }
                let id = sqlx::query_scalar(
                    "INSERT INTO tags (name, description) VALUES ($1, '') RETURNING id",
                )
                .bind(name)
                .fetch_one(&mut **tx)
                .await?;
                Ok(id)
            }

            /// Loads `(required tags, forbidden tags)` for the given
            /// dependency ids.
            async fn dependency_tags(
                &self,
                dependency_ids: &[i64],
            ) -> Result<HashMap<i64, (Vec<String>, Vec<String>)>, RepoError> {
                if dependency_ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let mut builder = in_list_query::<$db, i64>(
                    "SELECT dependency_tags.dependency_id, tags.name, dependency_tags.exclude \
                     FROM dependency_tags JOIN tags ON tags.id = dependency_tags.tag_id \
                     WHERE dependency_tags.dependency_id IN (",
                    dependency_ids,
                    ") ORDER BY tags.name",
                );
                let rows: Vec<(i64, String, bool)> = builder
                    .build_query_as()
                    .fetch_all(self.db_pool.deref())
                    .await?;
                let mut tags: HashMap<i64, (Vec<String>, Vec<String>)> = HashMap::new();
                for (dependency_id, name, exclude) in rows {
                    let entry = tags.entry(dependency_id).or_default();
                    if exclude {
                        entry.1.push(name);
                    } else {
                        entry.0.push(name);
                    }
                }
                Ok(tags)
            }
        }
    };
}

plugin_repo_impl!(sqlx::Postgres);
plugin_repo_impl!(sqlx::Sqlite);
