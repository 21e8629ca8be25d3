use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::model::filter::PluginFilter;
use crate::model::{Template, TemplateTab};
use crate::repo::template::{TabInsert, TemplateInsert, TemplateRepo};
use crate::service::RegistryError;
use crate::service::tabs::TabService;

/// CRUD and validation for templates and their tabs, plus the template file
/// import run at startup.
pub struct TemplateService {
    template_repo: Arc<dyn TemplateRepo>,
    tabs: Arc<TabService>,
}

#[derive(Debug, Clone, Default)]
pub struct TabParams {
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    pub location: String,
    pub icon: Option<String>,
    pub group_key: Option<String>,
    pub filter_string: String,
}

/// The JSON shape of a template file loaded at startup.
#[derive(Debug, Clone, Deserialize)]
struct TemplateImport {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    tabs: Vec<TabImport>,
}

#[derive(Debug, Clone, Deserialize)]
struct TabImport {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    sort_key: i64,
    #[serde(default = "default_location")]
    location: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    group_key: Option<String>,
    #[serde(default)]
    filter: serde_json::Value,
}

fn default_location() -> String {
    "workspace".to_string()
}

impl TemplateService {
    pub fn new(template_repo: Arc<dyn TemplateRepo>, tabs: Arc<TabService>) -> Self {
        Self { template_repo, tabs }
    }

    pub async fn create_template(
        &self,
        name: String,
        description: String,
        tags: Vec<String>,
    ) -> Result<Template, RegistryError> {
        let insert = TemplateInsert {
            name,
            description,
            tags,
        };
        let id = self.template_repo.create_template(&insert).await?;
        self.get_template(id).await
    }

    pub async fn get_template(&self, id: i64) -> Result<Template, RegistryError> {
        let record = self
            .template_repo
            .get_template(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Template {id}")))?;
        let mut tags = self.template_repo.template_tags(&[id]).await?;
        Ok(record.into_model(tags.remove(&id).unwrap_or_default()))
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>, RegistryError> {
        let records = self.template_repo.list_templates().await?;
        let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
        let mut tags = self.template_repo.template_tags(&ids).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let tags = tags.remove(&record.id).unwrap_or_default();
                record.into_model(tags)
            })
            .collect())
    }

    pub async fn update_template(
        &self,
        id: i64,
        name: String,
        description: String,
        tags: Vec<String>,
    ) -> Result<Template, RegistryError> {
        let insert = TemplateInsert {
            name,
            description,
            tags,
        };
        if !self.template_repo.update_template(id, &insert).await? {
            return Err(RegistryError::NotFound(format!("Template {id}")));
        }
        self.get_template(id).await
    }

    pub async fn delete_template(&self, id: i64) -> Result<(), RegistryError> {
        if !self.template_repo.delete_template(id).await? {
            return Err(RegistryError::NotFound(format!("Template {id}")));
        }
        Ok(())
    }

    fn validate_tab(params: &TabParams) -> Result<(), RegistryError> {
        if params.group_key.as_deref().is_some_and(|key| !key.is_empty()) {
            if !params.filter_string.trim().is_empty() {
                return Err(RegistryError::InvalidRequest(
                    "A tab with a group key must not carry a plugin filter!".to_string(),
                ));
            }
            if params.location.starts_with("workspace") {
                return Err(RegistryError::InvalidRequest(
                    "A tab with a group key must not be placed in a workspace location!"
                        .to_string(),
                ));
            }
        }
        if !params.filter_string.trim().is_empty() {
            PluginFilter::parse(&params.filter_string)?;
        }
        Ok(())
    }

    pub async fn create_tab(
        &self,
        template_id: i64,
        params: TabParams,
    ) -> Result<TemplateTab, RegistryError> {
        Self::validate_tab(&params)?;
        self.template_repo
            .get_template(template_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Template {template_id}")))?;
        let tab_id = self
            .template_repo
            .create_tab(template_id, &to_tab_insert(params))
            .await?;
        self.tabs.apply_filter_for_tab(tab_id).await?;
        self.get_tab(template_id, tab_id).await
    }

    pub async fn get_tab(&self, template_id: i64, tab_id: i64) -> Result<TemplateTab, RegistryError> {
        let record = self
            .template_repo
            .get_tab(tab_id)
            .await?
            .filter(|tab| tab.template_id == template_id)
            .ok_or_else(|| RegistryError::NotFound(format!("Template tab {tab_id}")))?;
        Ok(record.into())
    }

    pub async fn list_tabs(
        &self,
        template_id: i64,
        group: Option<&str>,
    ) -> Result<Vec<TemplateTab>, RegistryError> {
        self.template_repo
            .get_template(template_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("Template {template_id}")))?;
        Ok(self
            .template_repo
            .list_tabs(template_id, group)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub async fn update_tab(
        &self,
        template_id: i64,
        tab_id: i64,
        params: TabParams,
    ) -> Result<TemplateTab, RegistryError> {
        Self::validate_tab(&params)?;
        self.get_tab(template_id, tab_id).await?;
        self.template_repo
            .update_tab(tab_id, &to_tab_insert(params))
            .await?;
        self.tabs.apply_filter_for_tab(tab_id).await?;
        self.get_tab(template_id, tab_id).await
    }

    pub async fn delete_tab(&self, template_id: i64, tab_id: i64) -> Result<(), RegistryError> {
        self.get_tab(template_id, tab_id).await?;
        self.template_repo.delete_tab(tab_id).await?;
        Ok(())
    }

    pub async fn tab_plugin_ids(&self, tab_id: i64) -> Result<Vec<i64>, RegistryError> {
        Ok(self.template_repo.tab_plugin_ids(tab_id).await?)
    }

    /// Loads templates from the configured files and folders. Templates whose
    /// name is already known are left untouched.
    pub async fn load_ui_templates(&self, paths: &[PathBuf]) {
        for path in paths {
            if path.is_dir() {
                let Ok(entries) = std::fs::read_dir(path) else {
                    warn!("Tried to load templates from folder '{}' but it is not readable", path.display());
                    continue;
                };
                let mut files: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                    .collect();
                files.sort();
                for file in files {
                    self.load_template_file(&file).await;
                }
            } else if path.is_file() {
                self.load_template_file(path).await;
            } else {
                warn!(
                    "Tried to load templates from '{}' but it is neither a file nor a folder",
                    path.display()
                );
            }
        }
    }

    async fn load_template_file(&self, file: &Path) {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(err) => {
                warn!("Could not read template file '{}': {err}", file.display());
                return;
            }
        };
        let import: TemplateImport = match serde_json::from_str(&content) {
            Ok(import) => import,
            Err(err) => {
                warn!("Could not parse template file '{}': {err}", file.display());
                return;
            }
        };
        if let Err(err) = self.import_template(import).await {
            warn!("Could not import template file '{}': {err}", file.display());
            return;
        }
        info!("Loaded template from file '{}'", file.display());
    }

    async fn import_template(&self, import: TemplateImport) -> Result<(), RegistryError> {
        if self
            .template_repo
            .get_template_by_name(&import.name)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let template = self
            .create_template(import.name, import.description, import.tags)
            .await?;
        for tab in import.tabs {
            let filter_string = if tab.filter.is_null() {
                String::new()
            } else {
                serde_json::to_string(&tab.filter)
                    .map_err(|err| RegistryError::Internal(err.to_string()))?
            };
            self.create_tab(
                template.id,
                TabParams {
                    name: tab.name,
                    description: tab.description,
                    sort_key: tab.sort_key,
                    location: tab.location,
                    icon: tab.icon,
                    group_key: tab.group_key,
                    filter_string,
                },
            )
            .await?;
        }
        Ok(())
    }
}

fn to_tab_insert(params: TabParams) -> TabInsert {
    TabInsert {
        name: params.name,
        description: params.description,
        sort_key: params.sort_key,
        location: params.location,
        icon: params.icon,
        group_key: params.group_key,
        filter_string: params.filter_string,
    }
}
