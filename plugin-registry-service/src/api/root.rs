use std::sync::Arc;

use poem_openapi::OpenApi;
use poem_openapi::payload::Json;

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, GeneratorRegistry, PageResource, Resource, ResourceKind, RootData,
};

pub struct RootApi {
    generators: Arc<GeneratorRegistry>,
}

#[OpenApi(prefix_path = "/", tag = ApiTags::Root)]
impl RootApi {
    pub fn new(generators: Arc<GeneratorRegistry>) -> Self {
        Self { generators }
    }

    /// The root resource advertising navigation links to every resource
    /// type of this api.
    #[oai(path = "/", method = "get", operation_id = "get_root")]
    async fn root(&self) -> ApiResult<Json<ApiResponse<RootData>>> {
        let self_link = require_link(self.generators.link_of(&Resource::Root, None, &[], None))?;

        let collection = PageResource::collection(0);
        let mut links = Vec::new();
        for kind in [
            ResourceKind::Plugin,
            ResourceKind::Seed,
            ResourceKind::Service,
            ResourceKind::Env,
            ResourceKind::Template,
        ] {
            links.push(require_link(self.generators.link_of(
                &Resource::Collection(kind, &collection),
                None,
                &["nav"],
                None,
            ))?);
        }
        links.push(require_link(self.generators.link_of(
            &Resource::Recommendations,
            None,
            &["nav"],
            None,
        ))?);

        let response = ApiResponse::new(
            links,
            RootData {
                self_link,
                title: "Plugin Registry API".to_string(),
            },
        )
        .with_keyed_links(self.generators.keyed_links());
        Ok(Json(response))
    }
}
