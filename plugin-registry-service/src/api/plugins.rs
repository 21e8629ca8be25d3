use std::sync::Arc;

use poem_openapi::OpenApi;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;

use crate::api::ApiTags;
use crate::api::common::{ApiError, ApiResult, require_link};
use crate::api::hypermedia::{
    ApiResponse, CursorPageData, GeneratorRegistry, PageResource, PaginationQueryArgs, PluginData,
    PluginDependencyData, PluginEntryPointData, PluginInputDataData, PluginOutputDataData,
    QueryParams, Resource, ResourceKind,
};
use crate::model::Plugin;
use crate::repo::pagination::{
    DEFAULT_ITEM_COUNT, MAX_ITEM_COUNT, PageRequest, parse_sort_string,
};
use crate::service::discovery::DiscoveryService;
use crate::service::plugin::{PluginQuery, PluginService};

const DEFAULT_SORT: &str = "name,-version";

pub struct PluginsApi {
    plugins: Arc<PluginService>,
    discovery: Arc<DiscoveryService>,
    generators: Arc<GeneratorRegistry>,
}

#[derive(Debug, Clone, poem_openapi::ApiResponse)]
pub enum DiscoveryTriggeredResponse {
    /// Discovery for the given URL has been scheduled.
    #[oai(status = 204)]
    NoContent,
}

/// Builds the full hypermedia response of a single plugin.
pub fn plugin_response(
    generators: &GeneratorRegistry,
    plugin: &Plugin,
) -> ApiResult<ApiResponse<PluginData>> {
    let resource = Resource::Plugin(plugin);
    let self_link = require_link(generators.link_of(&resource, None, &[], None))?;

    let data_input = plugin
        .data_consumed()
        .map(|io| PluginInputDataData {
            parameter: io.identifier.clone(),
            data_type: io.data_type.to_string(),
            content_type: io.content_types.iter().map(ToString::to_string).collect(),
            required: io.required,
        })
        .collect();
    let data_output = plugin
        .data_produced()
        .map(|io| PluginOutputDataData {
            name: io.identifier.clone(),
            data_type: io.data_type.to_string(),
            content_type: io.content_types.iter().map(ToString::to_string).collect(),
            required: io.required,
        })
        .collect();
    let plugin_dependencies = plugin
        .dependencies
        .iter()
        .map(|dependency| {
            let mut tags = dependency.required_tags.clone();
            tags.extend(dependency.forbidden_tags.iter().map(|tag| format!("!{tag}")));
            PluginDependencyData {
                parameter: dependency.parameter.clone(),
                required: dependency.required,
                name: dependency.identifier.clone(),
                version: dependency.version.clone(),
                plugin_type: dependency.plugin_type.clone(),
                tags,
            }
        })
        .collect();

    let data = PluginData {
        self_link,
        href: plugin.url.clone(),
        identifier: plugin.identifier.clone(),
        version: plugin.version.clone(),
        title: plugin.title.clone(),
        description: plugin.description.clone(),
        plugin_type: plugin.plugin_type.clone(),
        tags: plugin.tags.clone(),
        entry_point: PluginEntryPointData {
            href: plugin.entry_url.clone(),
            ui_href: plugin.ui_url.clone(),
            data_input,
            data_output,
            plugin_dependencies,
        },
    };
    Ok(ApiResponse::new(generators.links_for(&resource, &[]), data))
}

#[OpenApi(prefix_path = "/plugins", tag = ApiTags::Plugins)]
impl PluginsApi {
    pub fn new(
        plugins: Arc<PluginService>,
        discovery: Arc<DiscoveryService>,
        generators: Arc<GeneratorRegistry>,
    ) -> Self {
        Self {
            plugins,
            discovery,
            generators,
        }
    }

    /// Get a page of the plugin catalog.
    ///
    /// All filter criteria are combined; the result is paginated by a stable
    /// cursor (the id of the row directly before the page).
    #[oai(path = "/", method = "get", operation_id = "list_plugins")]
    #[allow(clippy::too_many_arguments, reason = "query surface of the catalog")]
    async fn list_plugins(
        &self,
        #[oai(name = "plugin-id")] plugin_id: Query<Option<String>>,
        name: Query<Option<String>>,
        version: Query<Option<String>>,
        url: Query<Option<String>>,
        #[oai(name = "type")] plugin_type: Query<Option<String>>,
        tags: Query<Option<String>>,
        #[oai(name = "input-data-type")] input_data_type: Query<Option<String>>,
        #[oai(name = "input-content-type")] input_content_type: Query<Option<String>>,
        #[oai(name = "last-available-period")] last_available_period: Query<Option<i64>>,
        #[oai(name = "template-tab")] template_tab: Query<Option<i64>>,
        cursor: Query<Option<String>>,
        #[oai(name = "item-count")] item_count: Query<Option<i64>>,
        sort: Query<Option<String>>,
    ) -> ApiResult<Json<ApiResponse<CursorPageData>>> {
        let item_count = item_count.0.unwrap_or(DEFAULT_ITEM_COUNT);
        if !(1..=MAX_ITEM_COUNT).contains(&item_count) {
            return Err(ApiError::bad_request(format!(
                "The item-count must be between 1 and {MAX_ITEM_COUNT}!"
            )));
        }
        let cursor = match cursor.0.as_deref() {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                ApiError::bad_request(format!(
                    "Page cursor was {raw} but should have been an integer!"
                ))
            })?),
            None => None,
        };
        let sort_string = sort.0.clone().unwrap_or_else(|| DEFAULT_SORT.to_string());
        let sort_fields = parse_sort_string(&sort_string).map_err(ApiError::bad_request)?;
        let page_request = PageRequest {
            cursor,
            item_count,
            sort: sort_fields,
        };

        let query = PluginQuery {
            plugin_id: plugin_id.0.clone(),
            identifier: name.0.clone(),
            version: version.0.clone(),
            url: url.0.clone(),
            plugin_type: plugin_type.0.clone(),
            tags: tags.0.clone(),
            input_data_type: input_data_type.0.clone(),
            input_content_type: input_content_type.0.clone(),
            last_available_period: last_available_period.0,
            template_tab: template_tab.0,
        };
        let (info, plugins) = self.plugins.list(&query, &page_request).await?;

        let mut embedded = Vec::with_capacity(plugins.len());
        let mut items = Vec::with_capacity(plugins.len());
        for plugin in &plugins {
            let response = plugin_response(&self.generators, plugin)?;
            items.push(response.data.self_link.clone());
            embedded.push(response.to_embedded());
        }

        let page_resource = PageResource {
            page_number: info.cursor_page,
            active_page: info.cursor_page,
            last_page: info.last_page.as_ref().map(|page| page.page),
            collection_size: info.collection_size,
            parent_id: None,
        };

        let mut extra = QueryParams::new();
        let filter_params: [(&str, Option<String>); 10] = [
            ("plugin-id", plugin_id.0),
            ("name", name.0),
            ("version", version.0),
            ("url", url.0),
            ("type", plugin_type.0),
            ("tags", tags.0),
            ("input-data-type", input_data_type.0),
            ("input-content-type", input_content_type.0),
            (
                "last-available-period",
                last_available_period.0.map(|period| period.to_string()),
            ),
            ("template-tab", template_tab.0.map(|tab| tab.to_string())),
        ];
        for (name, value) in filter_params {
            if let Some(value) = value {
                extra.insert(name.to_string(), value);
            }
        }
        let args = PaginationQueryArgs {
            cursor,
            item_count,
            sort: sort.0,
            extra,
        };

        let resource = Resource::Collection(ResourceKind::Plugin, &page_resource);
        let self_link = require_link(self.generators.link_of(
            &resource,
            Some(&args.to_query_params(None)),
            &[],
            None,
        ))?;

        let mut links = self.generators.links_for(&resource, &[]);
        let first_page = page_resource.get_page(1);
        links.push(require_link(self.generators.link_of(
            &Resource::Collection(ResourceKind::Plugin, &first_page),
            Some(&args.to_query_params(Some(None))),
            &[],
            None,
        ))?);
        links.push(self_link.clone());
        let last_page_number = info.last_page.as_ref().map(|page| page.page);
        if let Some(last) = &info.last_page {
            if last.page != info.cursor_page {
                let last_resource = page_resource.get_page(last.page);
                links.push(require_link(self.generators.link_of(
                    &Resource::Collection(ResourceKind::Plugin, &last_resource),
                    Some(&args.to_query_params(Some(last.cursor))),
                    &[],
                    None,
                ))?);
            }
        }
        for page in &info.surrounding_pages {
            if Some(page.page) == last_page_number {
                continue;
            }
            let page_resource = page_resource.get_page(page.page);
            links.push(require_link(self.generators.link_of(
                &Resource::Collection(ResourceKind::Plugin, &page_resource),
                Some(&args.to_query_params(Some(page.cursor))),
                &[],
                None,
            ))?);
        }

        let response = ApiResponse::new(
            links,
            CursorPageData {
                self_link,
                collection_size: info.collection_size,
                page: info.cursor_page,
                items,
            },
        )
        .with_embedded(embedded);
        Ok(Json(response))
    }

    /// Trigger discovery of a new plugin.
    ///
    /// The plugin must be reachable via a registered seed for the discovery
    /// to be scheduled.
    #[oai(path = "/", method = "post", operation_id = "trigger_plugin_discovery")]
    async fn trigger_plugin_discovery(
        &self,
        url: Query<String>,
    ) -> ApiResult<DiscoveryTriggeredResponse> {
        self.discovery.clone().discover_known_url(&url.0).await?;
        Ok(DiscoveryTriggeredResponse::NoContent)
    }

    /// Get a single plugin.
    #[oai(path = "/:plugin_id/", method = "get", operation_id = "get_plugin")]
    async fn get_plugin(&self, plugin_id: Path<i64>) -> ApiResult<Json<ApiResponse<PluginData>>> {
        let plugin = self.plugins.get(plugin_id.0).await?;
        Ok(Json(plugin_response(&self.generators, &plugin)?))
    }
}
