use std::sync::Arc;

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, ChangedApiObjectData, CollectionData, DeletedApiObjectData, EnvData,
    GeneratorRegistry, NewApiObjectData, PageResource, Resource, ResourceKind,
};
use crate::model::EnvEntry;
use crate::repo::env::EnvRepo;
use crate::service::{RegistryError, on_conflict};

pub struct EnvApi {
    env_repo: Arc<dyn EnvRepo>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, Object)]
pub struct EnvCreateRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Object)]
pub struct EnvUpdateRequest {
    pub value: String,
}

fn env_response(
    generators: &GeneratorRegistry,
    entry: &EnvEntry,
) -> ApiResult<ApiResponse<EnvData>> {
    let resource = Resource::Env(entry);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;
    Ok(ApiResponse::new(
        generators.links_for(&resource, &[]),
        EnvData {
            self_link,
            name: entry.name.clone(),
            value: entry.value.clone(),
        },
    ))
}

#[OpenApi(prefix_path = "/env", tag = ApiTags::Env)]
impl EnvApi {
    pub fn new(env_repo: Arc<dyn EnvRepo>, generators: Arc<GeneratorRegistry>) -> Self {
        Self {
            env_repo,
            generators,
        }
    }

    /// Get all env entries exposed to crawled plugins.
    #[oai(path = "/", method = "get", operation_id = "list_env")]
    async fn list_env(&self) -> ApiResult<Json<ApiResponse<CollectionData>>> {
        let entries: Vec<EnvEntry> = self
            .env_repo
            .list()
            .await
            .map_err(RegistryError::from)?
            .into_iter()
            .map(Into::into)
            .collect();

        let mut items = Vec::with_capacity(entries.len());
        let mut embedded = Vec::with_capacity(entries.len());
        for entry in &entries {
            let response = env_response(&self.generators, entry)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let collection = PageResource::collection(entries.len() as i64);
        let resource = Resource::Collection(ResourceKind::Env, &collection);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            CollectionData {
                self_link,
                collection_size: entries.len() as i64,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Create a new env entry.
    #[oai(path = "/", method = "post", operation_id = "create_env")]
    async fn create_env(
        &self,
        body: Json<EnvCreateRequest>,
    ) -> ApiResult<Json<ApiResponse<NewApiObjectData>>> {
        self.env_repo
            .create(&body.0.name, &body.0.value)
            .await
            .map_err(on_conflict("Env entry"))?;
        let entry = EnvEntry {
            name: body.0.name,
            value: body.0.value,
        };
        let inner = env_response(&self.generators, &entry)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Env(&entry), &[]),
            NewApiObjectData {
                new: self_link.with_rel("new"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Get a single env entry.
    #[oai(path = "/:name/", method = "get", operation_id = "get_env")]
    async fn get_env(&self, name: Path<String>) -> ApiResult<Json<ApiResponse<EnvData>>> {
        let entry: EnvEntry = self
            .env_repo
            .get(&name.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Env entry {}", name.0)))?
            .into();
        Ok(Json(env_response(&self.generators, &entry)?))
    }

    /// Create or replace an env entry.
    #[oai(path = "/:name/", method = "put", operation_id = "update_env")]
    async fn update_env(
        &self,
        name: Path<String>,
        body: Json<EnvUpdateRequest>,
    ) -> ApiResult<Json<ApiResponse<ChangedApiObjectData>>> {
        self.env_repo
            .upsert(&name.0, &body.0.value)
            .await
            .map_err(RegistryError::from)?;
        let entry = EnvEntry {
            name: name.0,
            value: body.0.value,
        };
        let inner = env_response(&self.generators, &entry)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Env(&entry), &[]),
            ChangedApiObjectData {
                changed: self_link.with_rel("changed"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Remove an env entry.
    #[oai(path = "/:name/", method = "delete", operation_id = "delete_env")]
    async fn delete_env(
        &self,
        name: Path<String>,
    ) -> ApiResult<Json<ApiResponse<DeletedApiObjectData>>> {
        let entry: EnvEntry = self
            .env_repo
            .get(&name.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Env entry {}", name.0)))?
            .into();
        self.env_repo
            .delete(&name.0)
            .await
            .map_err(RegistryError::from)?;

        let resource = Resource::Env(&entry);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let collection = PageResource::collection(0);
        let redirect_to = require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::Env, &collection),
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
