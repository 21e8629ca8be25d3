use std::sync::Arc;

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, ChangedApiObjectData, CollectionData, DeletedApiObjectData, GeneratorRegistry,
    NewApiObjectData, PageResource, Resource, ResourceKind, TemplateData,
};
use crate::model::Template;
use crate::service::templates::TemplateService;

pub struct TemplatesApi {
    templates: Arc<TemplateService>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, Object)]
pub struct TemplateRequest {
    pub name: String,
    #[oai(default)]
    pub description: String,
    #[oai(default)]
    pub tags: Vec<String>,
}

fn template_response(
    generators: &GeneratorRegistry,
    template: &Template,
) -> ApiResult<ApiResponse<TemplateData>> {
    let resource = Resource::Template(template);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;
    // the tab collection is always reachable from a template
    let tab_collection = PageResource {
        parent_id: Some(template.id),
        ..PageResource::collection(0)
    };
    let mut links = generators.links_for(&resource, &[]);
    if let Some(tabs_link) = generators.link_of(
        &Resource::Collection(ResourceKind::TemplateTab, &tab_collection),
        None,
        &["nav"],
        None,
    ) {
        links.push(tabs_link);
    }
    Ok(ApiResponse::new(
        links,
        TemplateData {
            self_link,
            name: template.name.clone(),
            description: template.description.clone(),
            tags: template.tags.clone(),
        },
    ))
}

#[OpenApi(prefix_path = "/templates", tag = ApiTags::Templates)]
impl TemplatesApi {
    pub fn new(templates: Arc<TemplateService>, generators: Arc<GeneratorRegistry>) -> Self {
        Self {
            templates,
            generators,
        }
    }

    /// Get all user interface templates.
    #[oai(path = "/", method = "get", operation_id = "list_templates")]
    async fn list_templates(&self) -> ApiResult<Json<ApiResponse<CollectionData>>> {
        let templates = self.templates.list_templates().await?;

        let mut items = Vec::with_capacity(templates.len());
        let mut embedded = Vec::with_capacity(templates.len());
        for template in &templates {
            let response = template_response(&self.generators, template)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let collection = PageResource::collection(templates.len() as i64);
        let resource = Resource::Collection(ResourceKind::Template, &collection);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            CollectionData {
                self_link,
                collection_size: templates.len() as i64,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Create a new template.
    #[oai(path = "/", method = "post", operation_id = "create_template")]
    async fn create_template(
        &self,
        body: Json<TemplateRequest>,
    ) -> ApiResult<Json<ApiResponse<NewApiObjectData>>> {
        let template = self
            .templates
            .create_template(body.0.name, body.0.description, body.0.tags)
            .await?;
        let inner = template_response(&self.generators, &template)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Template(&template), &[]),
            NewApiObjectData {
                new: self_link.with_rel("new"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Get a single template.
    #[oai(path = "/:template_id/", method = "get", operation_id = "get_template")]
    async fn get_template(
        &self,
        template_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<TemplateData>>> {
        let template = self.templates.get_template(template_id.0).await?;
        Ok(Json(template_response(&self.generators, &template)?))
    }

    /// Update a template.
    #[oai(path = "/:template_id/", method = "put", operation_id = "update_template")]
    async fn update_template(
        &self,
        template_id: Path<i64>,
        body: Json<TemplateRequest>,
    ) -> ApiResult<Json<ApiResponse<ChangedApiObjectData>>> {
        let template = self
            .templates
            .update_template(template_id.0, body.0.name, body.0.description, body.0.tags)
            .await?;
        let inner = template_response(&self.generators, &template)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Template(&template), &[]),
            ChangedApiObjectData {
                changed: self_link.with_rel("changed"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Delete a template with all of its tabs.
    #[oai(path = "/:template_id/", method = "delete", operation_id = "delete_template")]
    async fn delete_template(
        &self,
        template_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<DeletedApiObjectData>>> {
        let template = self.templates.get_template(template_id.0).await?;
        self.templates.delete_template(template_id.0).await?;

        let resource = Resource::Template(&template);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let collection = PageResource::collection(0);
        let redirect_to = require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::Template, &collection),
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
