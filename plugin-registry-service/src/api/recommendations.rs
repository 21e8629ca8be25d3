use std::sync::Arc;
use std::time::Duration;

use poem_openapi::OpenApi;
use poem_openapi::param::Query;
use poem_openapi::payload::Json;

use crate::api::ApiTags;
use crate::api::common::{ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, GeneratorRegistry, QueryParams, RecommendationCollectionData, Resource,
};
use crate::api::plugins::plugin_response;
use crate::model::recommendation::{DataItem, RecommendationContext};
use crate::service::plugin::PluginService;
use crate::service::recommend::RecommendationService;

const MIN_TIMEOUT_SECONDS: f64 = 0.5;
const MAX_TIMEOUT_SECONDS: f64 = 300.0;
const MAX_LIMIT: u64 = 100;

pub struct RecommendationsApi {
    recommendations: Arc<RecommendationService>,
    plugins: Arc<PluginService>,
    generators: Arc<GeneratorRegistry>,
}

#[OpenApi(prefix_path = "/recommendations", tag = ApiTags::Recommendations)]
impl RecommendationsApi {
    pub fn new(
        recommendations: Arc<RecommendationService>,
        plugins: Arc<PluginService>,
        generators: Arc<GeneratorRegistry>,
    ) -> Self {
        Self {
            recommendations,
            plugins,
            generators,
        }
    }

    /// Get plugin recommendations for the given context.
    ///
    /// An ensemble of voters is run in parallel; voters that do not finish
    /// within the timeout are not counted. Inadmissible plugins (wrong type
    /// or unmet required inputs) never appear in the result.
    #[oai(path = "/", method = "get", operation_id = "get_recommendations")]
    #[allow(clippy::too_many_arguments, reason = "query surface of the engine")]
    async fn get_recommendations(
        &self,
        #[oai(name = "plugin-id")] plugin_id: Query<Option<i64>>,
        experiment: Query<Option<String>>,
        step: Query<Option<String>>,
        #[oai(name = "data-type")] data_type: Query<Option<String>>,
        #[oai(name = "content-type")] content_type: Query<Option<String>>,
        #[oai(name = "data-name")] data_name: Query<Option<String>>,
        timeout: Query<Option<f64>>,
        limit: Query<Option<u64>>,
    ) -> ApiResult<Json<ApiResponse<RecommendationCollectionData>>> {
        let timeout_seconds = match timeout.0 {
            Some(requested) if (MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&requested) => {
                requested
            }
            _ => self.recommendations.default_timeout().as_secs_f64(),
        };
        let limit = match limit.0 {
            Some(requested) if (1..=MAX_LIMIT).contains(&requested) => requested,
            _ => self.recommendations.default_limit(),
        };

        let mut context = RecommendationContext {
            current_plugin: plugin_id.0,
            experiment: experiment.0.clone(),
            current_step: step.0.clone(),
            ..RecommendationContext::default()
        };
        if data_type.0.is_some() || content_type.0.is_some() {
            context.current_data = vec![DataItem {
                data_type: data_type.0.clone().unwrap_or_else(|| "*".to_string()),
                content_type: content_type.0.clone().unwrap_or_else(|| "*".to_string()),
                name: data_name.0.clone(),
            }];
        }

        let votes = self
            .recommendations
            .recommend(context, Duration::from_secs_f64(timeout_seconds))
            .await?;
        let top_votes: Vec<(i64, f64)> = votes.into_iter().take(limit as usize).collect();

        let ids: Vec<i64> = top_votes.iter().map(|(id, _)| *id).collect();
        let plugins = self.plugins.get_many(&ids).await?;

        let mut items = Vec::with_capacity(plugins.len());
        let mut embedded = Vec::with_capacity(plugins.len());
        let mut weights = Vec::with_capacity(plugins.len());
        for plugin in &plugins {
            let response = plugin_response(&self.generators, plugin)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
            let weight = top_votes
                .iter()
                .find(|(id, _)| *id == plugin.id)
                .map(|(_, weight)| *weight)
                .unwrap_or(0.0);
            weights.push(weight);
        }

        let mut query = QueryParams::new();
        let query_args: [(&str, Option<String>); 8] = [
            ("plugin-id", plugin_id.0.map(|id| id.to_string())),
            ("experiment", experiment.0),
            ("step", step.0),
            ("data-type", data_type.0),
            ("content-type", content_type.0),
            ("data-name", data_name.0),
            ("timeout", timeout.0.map(|timeout| timeout.to_string())),
            ("limit", Some(limit.to_string())),
        ];
        for (name, value) in query_args {
            if let Some(value) = value {
                query.insert(name.to_string(), value);
            }
        }

        let resource = Resource::Recommendations;
        let self_link =
            require_link(self.generators.link_of(&resource, Some(&query), &[], None))?;
        let response = ApiResponse::new(
            self.generators.links_for(&resource, &[]),
            RecommendationCollectionData {
                self_link,
                items,
                weights,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }
}
