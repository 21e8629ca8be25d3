use std::sync::Arc;

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, CollectionData, DeletedApiObjectData, GeneratorRegistry, NewApiObjectData,
    PageResource, Resource, ResourceKind, SeedData,
};
use crate::model::Seed;
use crate::repo::seed::SeedRepo;
use crate::service::{RegistryError, on_conflict};

pub struct SeedsApi {
    seed_repo: Arc<dyn SeedRepo>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, Object)]
pub struct SeedCreateRequest {
    pub url: String,
}

fn seed_response(
    generators: &GeneratorRegistry,
    seed: &Seed,
) -> ApiResult<ApiResponse<SeedData>> {
    let resource = Resource::Seed(seed);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;
    Ok(ApiResponse::new(
        generators.links_for(&resource, &[]),
        SeedData {
            self_link,
            url: seed.url.clone(),
        },
    ))
}

#[OpenApi(prefix_path = "/seeds", tag = ApiTags::Seeds)]
impl SeedsApi {
    pub fn new(seed_repo: Arc<dyn SeedRepo>, generators: Arc<GeneratorRegistry>) -> Self {
        Self {
            seed_repo,
            generators,
        }
    }

    /// Get all seed URLs plugin discovery starts from.
    #[oai(path = "/", method = "get", operation_id = "list_seeds")]
    async fn list_seeds(&self) -> ApiResult<Json<ApiResponse<CollectionData>>> {
        let seeds: Vec<Seed> = self
            .seed_repo
            .list()
            .await
            .map_err(RegistryError::from)?
            .into_iter()
            .map(Into::into)
            .collect();

        let mut items = Vec::with_capacity(seeds.len());
        let mut embedded = Vec::with_capacity(seeds.len());
        for seed in &seeds {
            let response = seed_response(&self.generators, seed)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let collection = PageResource::collection(seeds.len() as i64);
        let resource = Resource::Collection(ResourceKind::Seed, &collection);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            CollectionData {
                self_link,
                collection_size: seeds.len() as i64,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Register a new seed URL. Responds with 409 when the URL is already
    /// registered.
    #[oai(path = "/", method = "post", operation_id = "create_seed")]
    async fn create_seed(
        &self,
        body: Json<SeedCreateRequest>,
    ) -> ApiResult<Json<ApiResponse<NewApiObjectData>>> {
        let id = self
            .seed_repo
            .create(&body.0.url)
            .await
            .map_err(on_conflict("Seed"))?;
        let seed = Seed {
            id,
            url: body.0.url,
        };
        let inner = seed_response(&self.generators, &seed)?;
        let self_link = inner.data.self_link.clone();
        let response = ApiResponse::new(
            self.generators.links_for(&Resource::Seed(&seed), &[]),
            NewApiObjectData {
                new: self_link.with_rel("new"),
                self_link,
            },
        )
        .with_embedded(vec![inner.to_embedded()]);
        Ok(Json(response))
    }

    /// Get a single seed.
    #[oai(path = "/:seed_id/", method = "get", operation_id = "get_seed")]
    async fn get_seed(&self, seed_id: Path<i64>) -> ApiResult<Json<ApiResponse<SeedData>>> {
        let seed: Seed = self
            .seed_repo
            .get(seed_id.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Seed {}", seed_id.0)))?
            .into();
        Ok(Json(seed_response(&self.generators, &seed)?))
    }

    /// Remove a seed. Plugins discovered through it stay in the catalog
    /// until they are purged.
    #[oai(path = "/:seed_id/", method = "delete", operation_id = "delete_seed")]
    async fn delete_seed(
        &self,
        seed_id: Path<i64>,
    ) -> ApiResult<Json<ApiResponse<DeletedApiObjectData>>> {
        let seed: Seed = self
            .seed_repo
            .get(seed_id.0)
            .await
            .map_err(RegistryError::from)?
            .ok_or_else(|| RegistryError::NotFound(format!("Seed {}", seed_id.0)))?
            .into();
        self.seed_repo
            .delete(seed_id.0)
            .await
            .map_err(RegistryError::from)?;

        let resource = Resource::Seed(&seed);
        let self_link = require_link(self.generators.link_of(&resource, None, &[], None))?;
        let collection = PageResource::collection(0);
        let redirect_to = require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::Seed, &collection),
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
