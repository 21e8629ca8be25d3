use std::sync::Arc;

use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, ChangedApiObjectData, CollectionData, DeletedApiObjectData, GeneratorRegistry,
    NewApiObjectData, PageResource, QueryParams, Resource, ResourceKind, TemplateTabData,
};
use crate::model::TemplateTab;
use crate::service::templates::{TabParams, TemplateService};

pub struct TemplateTabsApi {
    templates: Arc<TemplateService>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct TemplateTabRequest {
    pub name: String,
    #[oai(default)]
    pub description: String,
    #[oai(default)]
    pub sort_key: i64,
    #[oai(default = "default_location")]
    pub location: String,
    #[oai(default)]
    pub icon: Option<String>,
    #[oai(default)]
    pub group_key: Option<String>,
    /// The serialized plugin filter; must be empty or valid filter JSON.
    #[oai(default)]
    pub filter_string: String,
}

fn default_location() -> String {
    "workspace".to_string()
}

impl From<TemplateTabRequest> for TabParams {
    fn from(request: TemplateTabRequest) -> Self {
        TabParams {
            name: request.name,
            description: request.description,
            sort_key: request.sort_key,
            location: request.location,
            icon: request.icon,
            group_key: request.group_key,
            filter_string: request.filter_string,
        }
    }
}

fn tab_response(
    generators: &GeneratorRegistry,
    tab: &TemplateTab,
) -> ApiResult<ApiResponse<TemplateTabData>> {
    let resource = Resource::TemplateTab(tab);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;
    // plugins of a tab are served by the plugin catalog filtered by tab
    let plugin_collection = PageResource::collection(0);
    let plugins_query = QueryParams::from([("template-tab".to_string(), tab.id.to_string())]);
    let plugins = require_link(generators.link_of(
        &Resource::Collection(ResourceKind::Plugin, &plugin_collection),
        Some(&plugins_query),
        &[],
        None,
    ))?;
    Ok(ApiResponse::new(
        generators.links_for(&resource, &[]),
        TemplateTabData {
            self_link,
            name: tab.name.clone(),
            description: tab.description.clone(),
            location: tab.location.clone(),
            sort_key: tab.sort_key,
            icon: tab.icon.clone(),
            group_key: tab.group_key.clone(),
            filter_string: tab.filter_string.clone(),
            plugins,
        },
    ))
}

#[OpenApi(prefix_path = "/templates", tag = ApiTags::TemplateTabs)]
impl TemplateTabsApi {
    pub fn new(templates: Arc<TemplateService>, generators: Arc<GeneratorRegistry>) -> Self {
        Self {
            templates,
            generators,
        }
    }

    /// Get the tabs of a template, optionally restricted to a group
    /// location.
    #[oai(path = "/:template_id/tabs/", method = "get", operation_id = "list_template_tabs")]
    async fn list_tabs(
        &self,
        template_id: Path<i64>,
        group: Query<Option<String>>,
    ) -> ApiResult<Json<ApiResponse<CollectionData>>> {
        let tabs = self
            .templates
            .list_tabs(template_id.0, group.0.as_deref())
            .await?;

        let mut items = Vec::with_capacity(tabs.len());
        let mut embedded = Vec::with_capacity(tabs.len());
        for tab in &tabs {
            let response = tab_response(&self.generators, tab)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let collection = PageResource {
            parent_id: Some(template_id.0),
            ..PageResource::collection(tabs.len() as i64)
        };
        let resource = Resource::Collection(ResourceKind::TemplateTab, &collection);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            CollectionData {
                self_link,
                collection_size: tabs.len() as i64,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Create a new tab. The filter is applied to the catalog right away.
    #[oai(path = "/:template_id/tabs/", method = "post", operation_id = "create_template_tab")]
    async fn create_tab(
        &self,
        template_id: Path<i64>,
        body: Json<TemplateTabRequest>,
    ) -> ApiResult<Json<ApiResponse<NewApiObjectData>>> {
        let tab = self
            .templates
            .create_tab(template_id.0, body.0.into())
            .await?;
        let inner = tab_response(&self.generators, &tab)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::TemplateTab(&tab), &[]),
            NewApiObjectData {
                new: self_link.with_rel("new"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Get a single tab.
    #[oai(
        path = "/:template_id/tabs/:tab_id/",
        method = "get",
        operation_id = "get_template_tab"
    )]
    async fn get_tab(
        &self,
        template_id: Path<i64>,
        tab_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<TemplateTabData>>> {
        let tab = self.templates.get_tab(template_id.0, tab_id.0).await?;
        Ok(Json(tab_response(&self.generators, &tab)?))
    }

    /// Update a tab. The changed filter is applied to the catalog right
    /// away.
    #[oai(
        path = "/:template_id/tabs/:tab_id/",
        method = "put",
        operation_id = "update_template_tab"
    )]
    async fn update_tab(
        &self,
        template_id: Path<i64>,
        tab_id: Path<i64>,
        body: Json<TemplateTabRequest>,
    ) -> ApiResult<Json<ApiResponse<ChangedApiObjectData>>> {
        let tab = self
            .templates
            .update_tab(template_id.0, tab_id.0, body.0.into())
            .await?;
        let inner = tab_response(&self.generators, &tab)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::TemplateTab(&tab), &[]),
            ChangedApiObjectData {
                changed: self_link.with_rel("changed"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Delete a tab.
    #[oai(
        path = "/:template_id/tabs/:tab_id/",
        method = "delete",
        operation_id = "delete_template_tab"
    )]
    async fn delete_tab(
        &self,
        template_id: Path<i64>,
        tab_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<DeletedApiObjectData>>> {
        let tab = self.templates.get_tab(template_id.0, tab_id.0).await?;
        self.templates.delete_tab(template_id.0, tab_id.0).await?;

        let resource = Resource::TemplateTab(&tab);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let collection = PageResource {
            parent_id: Some(template_id.0),
            ..PageResource::collection(0)
        };
        let redirect_to = require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::TemplateTab, &collection),
            None,
            &[],
            None,
        ))?;
        let response = ApiResponse::new(
            vec![redirect_to.clone()],
            DeletedApiObjectData {
                deleted: self_link.with_rel("deleted"),
                self_link,
                redirect_to,
            },
        );
        Ok(Json(response))
    }
}
