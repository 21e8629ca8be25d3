//! The hypermedia response builder: api links, typed data objects, response
//! envelopes and the static generator dispatch tables.
//!
//! Generators are registered once at startup keyed by resource kind and link
//! relation; resources are a tagged union over borrowed records.

use std::collections::{BTreeMap, HashMap};

use poem_openapi::Object;
use poem_openapi::types::{ParseFromJSON, ToJSON};

use crate::model::{EnvEntry, Plugin, Seed, ServiceDescription, Template, TemplateTab};

pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Object)]
#[oai(rename_all = "camelCase")]
pub struct ApiLink {
    pub href: String,
    pub rel: Vec<String>,
    pub resource_type: String,
    #[oai(skip_serializing_if_is_empty)]
    pub resource_key: BTreeMap<String, String>,
    #[oai(skip_serializing_if_is_none)]
    pub schema: Option<String>,
    #[oai(skip_serializing_if_is_none)]
    pub doc: Option<String>,
    #[oai(skip_serializing_if_is_none)]
    pub name: Option<String>,
}

impl ApiLink {
    /// A copy of this link annotated with a single relation, e.g. the
    /// `new`/`changed`/`deleted` state relations.
    pub fn with_rel(&self, rel: &str) -> ApiLink {
        ApiLink {
            rel: vec![rel.to_string()],
            ..self.clone()
        }
    }
}

/// A templated api link: `key` lists the variables that must be substituted
/// in the href to obtain a concrete link.
#[derive(Debug, Clone, PartialEq, Object)]
#[oai(rename_all = "camelCase")]
pub struct KeyedApiLink {
    pub href: String,
    pub rel: Vec<String>,
    pub resource_type: String,
    pub key: Vec<String>,
    #[oai(skip_serializing_if_is_empty)]
    pub query_key: Vec<String>,
    #[oai(skip_serializing_if_is_none)]
    pub schema: Option<String>,
    #[oai(skip_serializing_if_is_none)]
    pub name: Option<String>,
}

/// The response envelope shared by every endpoint: navigation links, optional
/// embedded responses and the typed payload.
#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ApiResponse<T: ParseFromJSON + ToJSON + Send + Sync> {
    pub links: Vec<ApiLink>,
    #[oai(skip_serializing_if_is_empty)]
    pub keyed_links: Vec<KeyedApiLink>,
    #[oai(skip_serializing_if_is_empty)]
    pub embedded: Vec<serde_json::Value>,
    pub data: T,
}

impl<T: ParseFromJSON + ToJSON + Send + Sync> ApiResponse<T> {
    pub fn new(links: Vec<ApiLink>, data: T) -> Self {
        Self {
            links,
            keyed_links: vec![],
            embedded: vec![],
            data,
        }
    }

    pub fn with_embedded(mut self, embedded: Vec<serde_json::Value>) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn with_keyed_links(mut self, keyed_links: Vec<KeyedApiLink>) -> Self {
        self.keyed_links = keyed_links;
        self
    }

    /// The JSON form used when embedding this response into another one.
    pub fn to_embedded(&self) -> serde_json::Value {
        self.to_json().unwrap_or(serde_json::Value::Null)
    }
}

// Typed data objects.

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct RootData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub title: String,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct CursorPageData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub collection_size: i64,
    pub page: i64,
    pub items: Vec<ApiLink>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct CollectionData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub collection_size: i64,
    pub items: Vec<ApiLink>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PluginData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    /// The root URL of the plugin api.
    pub href: String,
    pub identifier: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub plugin_type: String,
    pub tags: Vec<String>,
    pub entry_point: PluginEntryPointData,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PluginEntryPointData {
    pub href: String,
    pub ui_href: String,
    pub data_input: Vec<PluginInputDataData>,
    pub data_output: Vec<PluginOutputDataData>,
    pub plugin_dependencies: Vec<PluginDependencyData>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PluginInputDataData {
    pub parameter: String,
    pub data_type: String,
    pub content_type: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PluginOutputDataData {
    pub name: String,
    pub data_type: String,
    pub content_type: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PluginDependencyData {
    pub parameter: String,
    pub required: bool,
    #[oai(skip_serializing_if_is_none)]
    pub name: Option<String>,
    #[oai(skip_serializing_if_is_none)]
    pub version: Option<String>,
    #[oai(rename = "type", skip_serializing_if_is_none)]
    pub plugin_type: Option<String>,
    /// Tag names, entries prefixed with `!` must not be present.
    #[oai(skip_serializing_if_is_empty)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct SeedData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub url: String,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ServiceData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub service_id: String,
    pub url: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct EnvData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct TemplateData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct TemplateTabData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub name: String,
    pub description: String,
    pub location: String,
    pub sort_key: i64,
    #[oai(skip_serializing_if_is_none)]
    pub icon: Option<String>,
    #[oai(skip_serializing_if_is_none)]
    pub group_key: Option<String>,
    pub filter_string: String,
    /// Link to the plugins currently contained in this tab.
    pub plugins: ApiLink,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct RecommendationCollectionData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub items: Vec<ApiLink>,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct NewApiObjectData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub new: ApiLink,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ChangedApiObjectData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub changed: ApiLink,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct DeletedApiObjectData {
    #[oai(rename = "self")]
    pub self_link: ApiLink,
    pub deleted: ApiLink,
    pub redirect_to: ApiLink,
}

// Resources and the generator registry.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Root,
    Plugin,
    Seed,
    Service,
    Env,
    Template,
    TemplateTab,
    Recommendation,
}

impl ResourceKind {
    pub fn rel_type(&self) -> &'static str {
        match self {
            ResourceKind::Root => "api-root",
            ResourceKind::Plugin => "plugin",
            ResourceKind::Seed => "seed",
            ResourceKind::Service => "service",
            ResourceKind::Env => "env",
            ResourceKind::Template => "ui-template",
            ResourceKind::TemplateTab => "ui-template-tab",
            ResourceKind::Recommendation => "plugin-recommendation",
        }
    }
}

/// A page (or plain collection) of resources of one kind.
#[derive(Debug, Clone, Default)]
pub struct PageResource {
    pub page_number: i64,
    pub active_page: i64,
    pub last_page: Option<i64>,
    pub collection_size: i64,
    /// Owning resource for nested collections (the template id for tab
    /// collections).
    pub parent_id: Option<i64>,
}

impl PageResource {
    pub fn collection(collection_size: i64) -> PageResource {
        PageResource {
            page_number: 1,
            active_page: 1,
            last_page: Some(1),
            collection_size,
            parent_id: None,
        }
    }

    pub fn is_first(&self) -> bool {
        self.page_number == 1
    }

    pub fn is_last(&self) -> bool {
        self.last_page == Some(self.page_number)
    }

    pub fn is_prev(&self) -> bool {
        self.page_number + 1 == self.active_page
    }

    pub fn is_next(&self) -> bool {
        self.page_number - 1 == self.active_page
    }

    pub fn get_page(&self, page_number: i64) -> PageResource {
        PageResource {
            page_number,
            ..self.clone()
        }
    }
}

/// The tagged union of everything the generator registry can produce links
/// for.
#[derive(Debug, Clone)]
pub enum Resource<'a> {
    Root,
    Collection(ResourceKind, &'a PageResource),
    Plugin(&'a Plugin),
    Seed(&'a Seed),
    Service(&'a ServiceDescription),
    Env(&'a EnvEntry),
    Template(&'a Template),
    TemplateTab(&'a TemplateTab),
    Recommendations,
}

impl Resource<'_> {
    fn kind(&self) -> ResourceKind {
        match self {
            Resource::Root => ResourceKind::Root,
            Resource::Collection(kind, _) => *kind,
            Resource::Plugin(_) => ResourceKind::Plugin,
            Resource::Seed(_) => ResourceKind::Seed,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Env(_) => ResourceKind::Env,
            Resource::Template(_) => ResourceKind::Template,
            Resource::TemplateTab(_) => ResourceKind::TemplateTab,
            Resource::Recommendations => ResourceKind::Recommendation,
        }
    }

    fn is_collection(&self) -> bool {
        matches!(self, Resource::Collection(_, _))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRel {
    Up,
    Create,
    Update,
    Delete,
    Restore,
}

impl LinkRel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRel::Up => "up",
            LinkRel::Create => "create",
            LinkRel::Update => "update",
            LinkRel::Delete => "delete",
            LinkRel::Restore => "restore",
        }
    }
}

/// Relations every envelope offers links for when a generator is registered.
pub const LINK_ACTIONS: [LinkRel; 4] = [
    LinkRel::Create,
    LinkRel::Update,
    LinkRel::Delete,
    LinkRel::Restore,
];

type LinkFn = fn(&GeneratorRegistry, &Resource<'_>, Option<&QueryParams>) -> Option<ApiLink>;
type KeyFn = fn(&GeneratorRegistry, &Resource<'_>, &mut BTreeMap<String, String>);

/// Static dispatch tables mapping `(resource kind, relation)` to link
/// generators, with separate tables for page resources. Built once at
/// startup, read only afterwards.
pub struct GeneratorRegistry {
    base_url: String,
    keys: HashMap<ResourceKind, KeyFn>,
    page_keys: HashMap<ResourceKind, KeyFn>,
    links: HashMap<(ResourceKind, Option<LinkRel>), LinkFn>,
    page_links: HashMap<(ResourceKind, Option<LinkRel>), LinkFn>,
}

impl GeneratorRegistry {
    pub fn new(api_base_url: &str) -> GeneratorRegistry {
        let mut registry = GeneratorRegistry {
            base_url: api_base_url.trim_end_matches('/').to_string(),
            keys: HashMap::new(),
            page_keys: HashMap::new(),
            links: HashMap::new(),
            page_links: HashMap::new(),
        };

        // Root ################################################################
        registry.links.insert((ResourceKind::Root, None), root_self);

        // Plugin ##############################################################
        registry.page_links.insert((ResourceKind::Plugin, None), plugin_page_self);
        registry
            .page_links
            .insert((ResourceKind::Plugin, Some(LinkRel::Up)), up_to_root);
        registry.page_keys.insert(ResourceKind::Plugin, no_key);
        registry.links.insert((ResourceKind::Plugin, None), plugin_self);
        registry
            .links
            .insert((ResourceKind::Plugin, Some(LinkRel::Up)), plugin_up);
        registry.keys.insert(ResourceKind::Plugin, plugin_key);

        // Seed ################################################################
        registry.page_links.insert((ResourceKind::Seed, None), seed_collection_self);
        registry
            .page_links
            .insert((ResourceKind::Seed, Some(LinkRel::Up)), up_to_root);
        registry
            .page_links
            .insert((ResourceKind::Seed, Some(LinkRel::Create)), seed_collection_self);
        registry.page_keys.insert(ResourceKind::Seed, no_key);
        registry.links.insert((ResourceKind::Seed, None), seed_self);
        registry
            .links
            .insert((ResourceKind::Seed, Some(LinkRel::Up)), seed_up);
        registry
            .links
            .insert((ResourceKind::Seed, Some(LinkRel::Delete)), seed_self);
        registry.keys.insert(ResourceKind::Seed, seed_key);

        // Service #############################################################
        registry
            .page_links
            .insert((ResourceKind::Service, None), service_collection_self);
        registry
            .page_links
            .insert((ResourceKind::Service, Some(LinkRel::Up)), up_to_root);
        registry.page_links.insert(
            (ResourceKind::Service, Some(LinkRel::Create)),
            service_collection_self,
        );
        registry.page_keys.insert(ResourceKind::Service, no_key);
        registry.links.insert((ResourceKind::Service, None), service_self);
        registry
            .links
            .insert((ResourceKind::Service, Some(LinkRel::Up)), service_up);
        registry
            .links
            .insert((ResourceKind::Service, Some(LinkRel::Delete)), service_self);
        registry.keys.insert(ResourceKind::Service, service_key);

        // Env #################################################################
        registry.page_links.insert((ResourceKind::Env, None), env_collection_self);
        registry
            .page_links
            .insert((ResourceKind::Env, Some(LinkRel::Up)), up_to_root);
        registry
            .page_links
            .insert((ResourceKind::Env, Some(LinkRel::Create)), env_collection_self);
        registry.page_keys.insert(ResourceKind::Env, no_key);
        registry.links.insert((ResourceKind::Env, None), env_self);
        registry.links.insert((ResourceKind::Env, Some(LinkRel::Up)), env_up);
        registry
            .links
            .insert((ResourceKind::Env, Some(LinkRel::Update)), env_self);
        registry
            .links
            .insert((ResourceKind::Env, Some(LinkRel::Delete)), env_self);
        registry.keys.insert(ResourceKind::Env, env_key);

        // Template ############################################################
        registry
            .page_links
            .insert((ResourceKind::Template, None), template_collection_self);
        registry
            .page_links
            .insert((ResourceKind::Template, Some(LinkRel::Up)), up_to_root);
        registry.page_links.insert(
            (ResourceKind::Template, Some(LinkRel::Create)),
            template_collection_self,
        );
        registry.page_keys.insert(ResourceKind::Template, no_key);
        registry.links.insert((ResourceKind::Template, None), template_self);
        registry
            .links
            .insert((ResourceKind::Template, Some(LinkRel::Up)), template_up);
        registry
            .links
            .insert((ResourceKind::Template, Some(LinkRel::Update)), template_self);
        registry
            .links
            .insert((ResourceKind::Template, Some(LinkRel::Delete)), template_self);
        registry.keys.insert(ResourceKind::Template, template_key);

        // Template tab ########################################################
        registry
            .page_links
            .insert((ResourceKind::TemplateTab, None), tab_collection_self);
        registry
            .page_links
            .insert((ResourceKind::TemplateTab, Some(LinkRel::Up)), tab_collection_up);
        registry.page_links.insert(
            (ResourceKind::TemplateTab, Some(LinkRel::Create)),
            tab_collection_self,
        );
        registry.page_keys.insert(ResourceKind::TemplateTab, tab_collection_key);
        registry.links.insert((ResourceKind::TemplateTab, None), tab_self);
        registry
            .links
            .insert((ResourceKind::TemplateTab, Some(LinkRel::Up)), tab_up);
        registry
            .links
            .insert((ResourceKind::TemplateTab, Some(LinkRel::Update)), tab_self);
        registry
            .links
            .insert((ResourceKind::TemplateTab, Some(LinkRel::Delete)), tab_self);
        registry.keys.insert(ResourceKind::TemplateTab, tab_key);

        // Recommendations #####################################################
        registry
            .links
            .insert((ResourceKind::Recommendation, None), recommendations_self);
        registry
            .links
            .insert((ResourceKind::Recommendation, Some(LinkRel::Up)), up_to_root);

        registry
    }

    pub fn href(&self, path: &str, query: Option<&QueryParams>) -> String {
        let mut href = format!("{}{path}", self.base_url);
        if let Some(query) = query {
            if !query.is_empty() {
                let encoded: Vec<String> = query
                    .iter()
                    .map(|(key, value)| {
                        format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
                    })
                    .collect();
                href.push('?');
                href.push_str(&encoded.join("&"));
            }
        }
        href
    }

    fn schema_ref(&self, name: &str) -> Option<String> {
        Some(format!(
            "{}/specs#/components/schemas/{name}",
            self.base_url
        ))
    }

    /// Builds the api key of a resource: query params (prefixed with `?`)
    /// plus the key attributes contributed by the resource's key generator.
    pub fn key_of(&self, resource: &Resource<'_>, query: Option<&QueryParams>) -> BTreeMap<String, String> {
        let mut key = BTreeMap::new();
        if let Some(query) = query {
            for (name, value) in query {
                key.insert(format!("?{name}"), value.clone());
            }
        }
        let table = if resource.is_collection() {
            &self.page_keys
        } else {
            &self.keys
        };
        if let Some(generator) = table.get(&resource.kind()) {
            generator(self, resource, &mut key);
        }
        key
    }

    /// The link for a resource and relation (`None` is the self relation).
    /// Page resources get `first`/`last`/`prev`/`next`/`page-N` relations
    /// added automatically.
    pub fn link_of(
        &self,
        resource: &Resource<'_>,
        query: Option<&QueryParams>,
        extra_rels: &[&str],
        for_relation: Option<LinkRel>,
    ) -> Option<ApiLink> {
        let table = if resource.is_collection() {
            &self.page_links
        } else {
            &self.links
        };
        let generator = table.get(&(resource.kind(), for_relation))?;
        let mut link = generator(self, resource, query)?;

        if let Some(relation) = for_relation {
            link.rel = vec![relation.as_str().to_string()];
        } else if let Resource::Collection(_, page) = resource {
            if page.is_first() {
                link.rel.push("first".to_string());
            }
            if page.is_last() {
                link.rel.push("last".to_string());
            }
            if page.is_prev() {
                link.rel.push("prev".to_string());
            }
            if page.is_next() {
                link.rel.push("next".to_string());
            }
            link.rel.push(format!("page-{}", page.page_number));
        }
        for extra in extra_rels {
            link.rel.push((*extra).to_string());
        }
        link.rel.dedup();
        Some(link)
    }

    /// The default links of an envelope: `up` plus every registered action
    /// relation, plus the requested extras.
    pub fn links_for(&self, resource: &Resource<'_>, extra_rels: &[LinkRel]) -> Vec<ApiLink> {
        let mut relations: Vec<LinkRel> = Vec::from(LINK_ACTIONS);
        relations.insert(0, LinkRel::Up);
        for extra in extra_rels {
            if !relations.contains(extra) {
                relations.push(*extra);
            }
        }
        relations
            .into_iter()
            .filter_map(|relation| self.link_of(resource, None, &[], Some(relation)))
            .collect()
    }

    /// The templated links advertised by the root resource.
    pub fn keyed_links(&self) -> Vec<KeyedApiLink> {
        vec![
            KeyedApiLink {
                href: self.href("/plugins/{pluginId}/", None),
                rel: vec![],
                resource_type: ResourceKind::Plugin.rel_type().to_string(),
                key: vec!["pluginId".to_string()],
                query_key: vec![],
                schema: self.schema_ref("PluginData"),
                name: None,
            },
            KeyedApiLink {
                href: self.href("/seeds/{seedId}/", None),
                rel: vec![],
                resource_type: ResourceKind::Seed.rel_type().to_string(),
                key: vec!["seedId".to_string()],
                query_key: vec![],
                schema: self.schema_ref("SeedData"),
                name: None,
            },
            KeyedApiLink {
                href: self.href("/env/{envName}/", None),
                rel: vec![],
                resource_type: ResourceKind::Env.rel_type().to_string(),
                key: vec!["envName".to_string()],
                query_key: vec![],
                schema: self.schema_ref("EnvData"),
                name: None,
            },
        ]
    }
}

// Key generators ##############################################################

fn no_key(_registry: &GeneratorRegistry, _resource: &Resource<'_>, _key: &mut BTreeMap<String, String>) {}

fn plugin_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::Plugin(record) = resource {
        key.insert("pluginId".to_string(), record.id.to_string());
    }
}

fn seed_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::Seed(record) = resource {
        key.insert("seedId".to_string(), record.id.to_string());
    }
}

fn service_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::Service(record) = resource {
        key.insert("serviceId".to_string(), record.id.to_string());
    }
}

fn env_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::Env(record) = resource {
        key.insert("envName".to_string(), record.name.clone());
    }
}

fn template_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::Template(record) = resource {
        key.insert("templateId".to_string(), record.id.to_string());
    }
}

fn tab_collection_key(
    _registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    key: &mut BTreeMap<String, String>,
) {
    if let Resource::Collection(_, page) = resource {
        if let Some(template_id) = page.parent_id {
            key.insert("templateId".to_string(), template_id.to_string());
        }
    }
}

fn tab_key(_registry: &GeneratorRegistry, resource: &Resource<'_>, key: &mut BTreeMap<String, String>) {
    if let Resource::TemplateTab(record) = resource {
        key.insert("templateId".to_string(), record.template_id.to_string());
        key.insert("tabId".to_string(), record.id.to_string());
    }
}

// Link generators #############################################################

fn root_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    Some(ApiLink {
        href: registry.href("/", query),
        rel: vec![],
        resource_type: ResourceKind::Root.rel_type().to_string(),
        resource_key: registry.key_of(resource, query),
        schema: registry.schema_ref("RootData"),
        doc: None,
        name: None,
    })
}

fn up_to_root(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    root_self(registry, &Resource::Root, query)
}

fn collection_link(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
    kind: ResourceKind,
    path: &str,
    schema: &str,
    page: bool,
) -> Option<ApiLink> {
    let mut rel = vec!["collection".to_string()];
    if page {
        rel.push("page".to_string());
    }
    Some(ApiLink {
        href: registry.href(path, query),
        rel,
        resource_type: kind.rel_type().to_string(),
        resource_key: registry.key_of(resource, query),
        schema: registry.schema_ref(schema),
        doc: None,
        name: None,
    })
}

fn plugin_page_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::Plugin,
        "/plugins/",
        "CursorPageData",
        true,
    )
}

fn plugin_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Plugin(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(&format!("/plugins/{}/", record.id), query),
        rel: vec![],
        resource_type: ResourceKind::Plugin.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("PluginData"),
        doc: None,
        name: Some(format!("{} ({})", record.title, record.version)),
    })
}

fn plugin_up(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let page = PageResource::collection(0);
    plugin_page_self(registry, &Resource::Collection(ResourceKind::Plugin, &page), query)
}

fn seed_collection_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::Seed,
        "/seeds/",
        "CollectionData",
        false,
    )
}

fn seed_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Seed(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(&format!("/seeds/{}/", record.id), query),
        rel: vec![],
        resource_type: ResourceKind::Seed.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("SeedData"),
        doc: None,
        name: Some(record.url.clone()),
    })
}

fn seed_up(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let page = PageResource::collection(0);
    seed_collection_self(registry, &Resource::Collection(ResourceKind::Seed, &page), query)
}

fn service_collection_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::Service,
        "/services/",
        "CollectionData",
        false,
    )
}

fn service_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Service(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(&format!("/services/{}/", record.id), query),
        rel: vec![],
        resource_type: ResourceKind::Service.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("ServiceData"),
        doc: None,
        name: Some(record.name.clone()),
    })
}

fn service_up(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let page = PageResource::collection(0);
    service_collection_self(registry, &Resource::Collection(ResourceKind::Service, &page), query)
}

fn env_collection_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::Env,
        "/env/",
        "CollectionData",
        false,
    )
}

fn env_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Env(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(&format!("/env/{}/", record.name), query),
        rel: vec![],
        resource_type: ResourceKind::Env.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("EnvData"),
        doc: None,
        name: Some(record.name.clone()),
    })
}

fn env_up(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let page = PageResource::collection(0);
    env_collection_self(registry, &Resource::Collection(ResourceKind::Env, &page), query)
}

fn template_collection_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::Template,
        "/templates/",
        "CollectionData",
        false,
    )
}

fn template_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Template(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(&format!("/templates/{}/", record.id), query),
        rel: vec![],
        resource_type: ResourceKind::Template.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("TemplateData"),
        doc: None,
        name: Some(record.name.clone()),
    })
}

fn template_up(
    registry: &GeneratorRegistry,
    _resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let page = PageResource::collection(0);
    template_collection_self(registry, &Resource::Collection(ResourceKind::Template, &page), query)
}

fn tab_collection_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Collection(_, page) = resource else {
        return None;
    };
    let template_id = page.parent_id?;
    collection_link(
        registry,
        resource,
        query,
        ResourceKind::TemplateTab,
        &format!("/templates/{template_id}/tabs/"),
        "CollectionData",
        false,
    )
}

fn tab_collection_up(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::Collection(_, page) = resource else {
        return None;
    };
    let template_id = page.parent_id?;
    Some(ApiLink {
        href: registry.href(&format!("/templates/{template_id}/"), query),
        rel: vec![],
        resource_type: ResourceKind::Template.rel_type().to_string(),
        resource_key: BTreeMap::from([("templateId".to_string(), template_id.to_string())]),
        schema: registry.schema_ref("TemplateData"),
        doc: None,
        name: None,
    })
}

fn tab_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::TemplateTab(record) = resource else {
        return None;
    };
    Some(ApiLink {
        href: registry.href(
            &format!("/templates/{}/tabs/{}/", record.template_id, record.id),
            query,
        ),
        rel: vec![],
        resource_type: ResourceKind::TemplateTab.rel_type().to_string(),
        resource_key: registry.key_of(resource, None),
        schema: registry.schema_ref("TemplateTabData"),
        doc: None,
        name: Some(record.name.clone()),
    })
}

fn tab_up(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    let Resource::TemplateTab(record) = resource else {
        return None;
    };
    let page = PageResource {
        parent_id: Some(record.template_id),
        ..PageResource::collection(0)
    };
    tab_collection_self(
        registry,
        &Resource::Collection(ResourceKind::TemplateTab, &page),
        query,
    )
}

fn recommendations_self(
    registry: &GeneratorRegistry,
    resource: &Resource<'_>,
    query: Option<&QueryParams>,
) -> Option<ApiLink> {
    Some(ApiLink {
        href: registry.href("/recommendations/", query),
        rel: vec!["collection".to_string()],
        resource_type: ResourceKind::Recommendation.rel_type().to_string(),
        resource_key: registry.key_of(resource, query),
        schema: registry.schema_ref("RecommendationCollectionData"),
        doc: None,
        name: None,
    })
}

// Pagination query arguments ##################################################

/// Pagination query arguments of the current request, used to rebuild the
/// query strings of page links.
#[derive(Debug, Clone, Default)]
pub struct PaginationQueryArgs {
    pub cursor: Option<i64>,
    pub item_count: i64,
    pub sort: Option<String>,
    pub extra: QueryParams,
}

impl PaginationQueryArgs {
    /// Query params for a page link. `cursor_override` replaces
    /// (`Some(Some(_))`) or removes (`Some(None)`) the current cursor.
    pub fn to_query_params(&self, cursor_override: Option<Option<i64>>) -> QueryParams {
        let mut params = QueryParams::new();
        params.insert("item-count".to_string(), self.item_count.to_string());
        let cursor = match cursor_override {
            Some(cursor) => cursor,
            None => self.cursor,
        };
        if let Some(cursor) = cursor {
            params.insert("cursor".to_string(), cursor.to_string());
        }
        if let Some(sort) = &self.sort {
            params.insert("sort".to_string(), sort.clone());
        }
        for (name, value) in &self.extra {
            params.insert(name.clone(), value.clone());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    fn registry() -> GeneratorRegistry {
        GeneratorRegistry::new("http://localhost:8080/api")
    }

    fn plugin_model() -> Plugin {
        Plugin {
            id: 7,
            identifier: "k-means".to_string(),
            version: "1.2.0".to_string(),
            title: "K-Means".to_string(),
            description: String::new(),
            plugin_type: "processing".to_string(),
            url: "http://plugins/k-means/".to_string(),
            entry_url: "http://plugins/k-means/process/".to_string(),
            ui_url: "http://plugins/k-means/ui/".to_string(),
            schema: serde_json::json!({"type": "object"}),
            last_available: chrono::Utc::now(),
            seed_id: None,
            tags: vec!["clustering".to_string()],
            data: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn plugin_self_links_carry_key_and_name() {
        let registry = registry();
        let record = plugin_model();
        let link = registry
            .link_of(&Resource::Plugin(&record), None, &[], None)
            .unwrap();
        assert_eq!(link.href, "http://localhost:8080/api/plugins/7/");
        assert_eq!(link.resource_key.get("pluginId"), Some(&"7".to_string()));
        assert_eq!(link.name.as_deref(), Some("K-Means (1.2.0)"));
    }

    #[test]
    fn page_links_advertise_page_relations() {
        let registry = registry();
        let page = PageResource {
            page_number: 2,
            active_page: 3,
            last_page: Some(4),
            collection_size: 100,
            parent_id: None,
        };
        let link = registry
            .link_of(
                &Resource::Collection(ResourceKind::Plugin, &page),
                None,
                &[],
                None,
            )
            .unwrap();
        assert!(link.rel.contains(&"prev".to_string()));
        assert!(link.rel.contains(&"page-2".to_string()));
        assert!(!link.rel.contains(&"first".to_string()));
        assert!(!link.rel.contains(&"last".to_string()));
    }

    #[test]
    fn envelope_links_include_up_and_registered_actions() {
        let registry = registry();
        let record = EnvEntry {
            name: "BACKEND_URL".to_string(),
            value: "http://backend".to_string(),
        };
        let links = registry.links_for(&Resource::Env(&record), &[]);
        let rels: Vec<&str> = links
            .iter()
            .flat_map(|link| link.rel.iter().map(String::as_str))
            .collect();
        assert!(rels.contains(&"up"));
        assert!(rels.contains(&"update"));
        assert!(rels.contains(&"delete"));
        // env entries cannot be restored, no generator is registered
        assert!(!rels.contains(&"restore"));
    }

    #[test]
    fn query_params_are_encoded_into_hrefs() {
        let registry = registry();
        let params = QueryParams::from([
            ("item-count".to_string(), "25".to_string()),
            ("tags".to_string(), "a,!b".to_string()),
        ]);
        let href = registry.href("/plugins/", Some(&params));
        assert_eq!(
            href,
            "http://localhost:8080/api/plugins/?item-count=25&tags=a%2C%21b"
        );
    }
}
