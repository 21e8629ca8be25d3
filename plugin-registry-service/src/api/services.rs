use std::sync::Arc;

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, CollectionData, DeletedApiObjectData, GeneratorRegistry, NewApiObjectData,
    PageResource, Resource, ResourceKind, ServiceData,
};
use crate::model::ServiceDescription;
use crate::repo::service::{ServiceInsert, ServiceRepo};
use crate::service::{RegistryError, on_conflict};

pub struct ServicesApi {
    service_repo: Arc<dyn ServiceRepo>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ServiceCreateRequest {
    pub service_id: String,
    pub url: String,
    pub name: String,
    #[oai(default)]
    pub description: String,
}

fn service_response(
    generators: &GeneratorRegistry,
    service: &ServiceDescription,
) -> ApiResult<ApiResponse<ServiceData>> {
    let resource = Resource::Service(service);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;
    Ok(ApiResponse::new(
        generators.links_for(&resource, &[]),
        ServiceData {
            self_link,
            service_id: service.service_id.clone(),
            url: service.url.clone(),
            name: service.name.clone(),
            description: service.description.clone(),
        },
    ))
}

#[OpenApi(prefix_path = "/services", tag = ApiTags::Services)]
impl ServicesApi {
    pub fn new(service_repo: Arc<dyn ServiceRepo>, generators: Arc<GeneratorRegistry>) -> Self {
        Self {
            service_repo,
            generators,
        }
    }

    /// Get all registered external services.
    #[oai(path = "/", method = "get", operation_id = "list_services")]
    async fn list_services(&self) -> ApiResult<Json<ApiResponse<CollectionData>>> {
        let services: Vec<ServiceDescription> = self
            .service_repo
            .list()
            .await
            .map_err(RegistryError::from)?
            .into_iter()
            .map(Into::into)
            .collect();

        let mut items = Vec::with_capacity(services.len());
        let mut embedded = Vec::with_capacity(services.len());
        for service in &services {
            let response = service_response(&self.generators, service)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let collection = PageResource::collection(services.len() as i64);
        let resource = Resource::Collection(ResourceKind::Service, &collection);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            CollectionData {
                self_link,
                collection_size: services.len() as i64,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Register a new external service.
    #[oai(path = "/", method = "post", operation_id = "create_service")]
    async fn create_service(
        &self,
        body: Json<ServiceCreateRequest>,
    ) -> ApiResult<Json<ApiResponse<NewApiObjectData>>> {
        let insert = ServiceInsert {
            service_id: body.0.service_id,
            url: body.0.url,
            name: body.0.name,
            description: body.0.description,
        };
        let id = self
            .service_repo
            .create(&insert)
            .await
            .map_err(on_conflict("Service"))?;
        let service = ServiceDescription {
            id,
            service_id: insert.service_id,
            url: insert.url,
            name: insert.name,
            description: insert.description,
        };
        let inner = service_response(&self.generators, &service)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Service(&service), &[]),
            NewApiObjectData {
                new: self_link.with_rel("new"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Get a single service.
    #[oai(path = "/:service_id/", method = "get", operation_id = "get_service")]
    async fn get_service(
        &self,
        service_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<ServiceData>>> {
        let service: ServiceDescription = self
            .service_repo
            .get(service_id.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Service {}", service_id.0)))?
            .into();
        Ok(Json(service_response(&self.generators, &service)?))
    }

    /// Remove a service.
    #[oai(path = "/:service_id/", method = "delete", operation_id = "delete_service")]
    async fn delete_service(
        &self,
        service_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<DeletedApiObjectData>>> {
        let service: ServiceDescription = self
            .service_repo
            .get(service_id.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Service {}", service_id.0)))?
            .into();
        self.service_repo
            .delete(service_id.0)
            .await
            .map_err(RegistryError::from)?;

        let resource = Resource::Service(&service);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let collection = PageResource::collection(0);
        let redirect_to = require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::Service, &collection),
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
