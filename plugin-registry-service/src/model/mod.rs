use std::collections::HashSet;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod filter;
pub mod recommendation;
pub mod version;

pub const PLUGIN_TYPE_PROCESSING: &str = "processing";
pub const PLUGIN_TYPE_CONVERSION: &str = "conversion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataRelation {
    Consumed,
    Produced,
}

impl DataRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataRelation::Consumed => "consumed",
            DataRelation::Produced => "produced",
        }
    }

    pub fn parse(value: &str) -> Option<DataRelation> {
        match value {
            "consumed" => Some(DataRelation::Consumed),
            "produced" => Some(DataRelation::Produced),
            _ => None,
        }
    }
}

impl Display for DataRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data type or content type pattern split on the first `/`.
///
/// `*` on either side acts as a wildcard, both when stored on a plugin and
/// when used in a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MimePattern {
    pub start: String,
    pub end: String,
}

impl MimePattern {
    pub fn parse(value: &str) -> MimePattern {
        if value.is_empty() {
            return MimePattern::wildcard();
        }
        let (start, end) = match value.split_once('/') {
            Some((start, end)) => (start, end),
            None => (value, ""),
        };
        MimePattern {
            start: if start.is_empty() {
                "*".to_string()
            } else {
                start.to_string()
            },
            end: if end.is_empty() {
                "*".to_string()
            } else {
                end.to_string()
            },
        }
    }

    pub fn wildcard() -> MimePattern {
        MimePattern {
            start: "*".to_string(),
            end: "*".to_string(),
        }
    }

    pub fn matches(&self, other: &MimePattern) -> bool {
        let start_matches = self.start == "*" || other.start == "*" || self.start == other.start;
        let end_matches = self.end == "*" || other.end == "*" || self.end == other.end;
        start_matches && end_matches
    }
}

impl Display for MimePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.end)
    }
}

/// A fully loaded catalog entry for a remotely hosted plugin.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub id: i64,
    pub identifier: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub plugin_type: String,
    pub url: String,
    pub entry_url: String,
    pub ui_url: String,
    pub schema: serde_json::Value,
    pub last_available: DateTime<Utc>,
    pub seed_id: Option<i64>,
    pub tags: Vec<String>,
    pub data: Vec<IoData>,
    pub dependencies: Vec<PluginDependency>,
}

impl Plugin {
    /// The full plugin id of the form `identifier@version`.
    pub fn full_id(&self) -> String {
        format!("{}@{}", self.identifier, self.version)
    }

    pub fn data_consumed(&self) -> impl Iterator<Item = &IoData> {
        self.data
            .iter()
            .filter(|d| d.relation == DataRelation::Consumed)
    }

    pub fn data_produced(&self) -> impl Iterator<Item = &IoData> {
        self.data
            .iter()
            .filter(|d| d.relation == DataRelation::Produced)
    }
}

/// A declared input or output of a plugin.
#[derive(Debug, Clone)]
pub struct IoData {
    pub identifier: String,
    pub required: bool,
    pub relation: DataRelation,
    pub data_type: MimePattern,
    pub content_types: Vec<MimePattern>,
}

/// A plugin's declared dependency on another plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginDependency {
    pub parameter: String,
    pub required: bool,
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub plugin_type: Option<String>,
    pub required_tags: Vec<String>,
    pub forbidden_tags: Vec<String>,
    pub best_match_id: Option<i64>,
}

impl PluginDependency {
    /// Whether the given plugin satisfies this dependency.
    ///
    /// Dependencies with overlapping required and forbidden tag sets are
    /// unsatisfiable (the caller is expected to log this once per
    /// resolution run).
    pub fn matches(&self, plugin: &Plugin) -> bool {
        if let Some(identifier) = &self.identifier {
            if &plugin.identifier != identifier {
                return false;
            }
            if let Some(version) = &self.version {
                if !version::version_matches_requirement(&plugin.version, version) {
                    return false;
                }
            }
        }
        if let Some(plugin_type) = &self.plugin_type {
            if &plugin.plugin_type != plugin_type {
                return false;
            }
        }
        let plugin_tags: HashSet<&str> = plugin.tags.iter().map(String::as_str).collect();
        if self
            .required_tags
            .iter()
            .any(|t| self.forbidden_tags.contains(t))
        {
            return false;
        }
        self.required_tags
            .iter()
            .all(|t| plugin_tags.contains(t.as_str()))
            && !self
                .forbidden_tags
                .iter()
                .any(|t| plugin_tags.contains(t.as_str()))
    }

    pub fn has_impossible_tags(&self) -> bool {
        self.required_tags
            .iter()
            .any(|t| self.forbidden_tags.contains(t))
    }
}

#[derive(Debug, Clone)]
pub struct Seed {
    pub id: i64,
    pub url: String,
}

/// An external service record, e.g. the experiment backend used by the
/// recommendation engine.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub id: i64,
    pub service_id: String,
    pub url: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateTab {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    pub location: String,
    pub icon: Option<String>,
    pub group_key: Option<String>,
    pub filter_string: String,
}

impl TemplateTab {
    /// Parses the stored filter string. The serialized form is the source of
    /// truth, it is re-parsed on every use.
    pub fn plugin_filter(&self) -> Result<filter::PluginFilter, filter::FilterError> {
        filter::PluginFilter::parse(&self.filter_string)
    }
}

// The self description shapes plugins expose and the crawler ingests.

/// Keys that identify a JSON object as a plugin self description.
pub const PLUGIN_SIGNATURE_KEYS: [&str; 7] = [
    "name",
    "version",
    "title",
    "description",
    "type",
    "tags",
    "entryPoint",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescription {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub entry_point: EntryPointDescription,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointDescription {
    pub href: String,
    #[serde(default)]
    pub ui_href: String,
    #[serde(default)]
    pub data_input: Vec<DataInputDescription>,
    #[serde(default)]
    pub data_output: Vec<DataOutputDescription>,
    #[serde(default)]
    pub plugin_dependencies: Vec<DependencyDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInputDescription {
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub content_type: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOutputDescription {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub content_type: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDescription {
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default)]
    pub plugin_type: Option<String>,
    /// Tag names, entries prefixed with `!` are forbidden tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

/// The `/plugins` listing of a plugin runner.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerPluginList {
    #[serde(default)]
    pub plugins: Vec<RunnerPluginRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPluginRef {
    #[serde(default)]
    pub api_root: Option<String>,
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn mime_pattern_splits_on_first_slash() {
        let pattern = MimePattern::parse("entity/vector/stream");
        assert_eq!(pattern.start, "entity");
        assert_eq!(pattern.end, "vector/stream");
        assert_eq!(MimePattern::parse("").to_string(), "*/*");
        assert_eq!(MimePattern::parse("entity").to_string(), "entity/*");
        assert_eq!(MimePattern::parse("/json").to_string(), "*/json");
    }

    #[test]
    fn mime_pattern_wildcards_match_both_sides() {
        let entity_list = MimePattern::parse("entity/list");
        assert!(MimePattern::parse("entity/*").matches(&entity_list));
        assert!(MimePattern::parse("*/list").matches(&entity_list));
        assert!(entity_list.matches(&MimePattern::parse("entity/*")));
        assert!(!MimePattern::parse("graph/list").matches(&entity_list));
        assert!(MimePattern::wildcard().matches(&entity_list));
    }

    #[test]
    fn dependency_with_impossible_tags_matches_nothing() {
        let dependency = PluginDependency {
            required_tags: vec!["a".to_string()],
            forbidden_tags: vec!["a".to_string()],
            ..PluginDependency::default()
        };
        assert!(dependency.has_impossible_tags());
    }

    #[test]
    fn plugin_description_parses_ingest_shape() {
        let raw = serde_json::json!({
            "name": "k-means",
            "version": "1.2.0",
            "title": "K-Means",
            "description": "Clustering",
            "type": "processing",
            "tags": ["clustering"],
            "entryPoint": {
                "href": "./process/",
                "uiHref": "./ui/",
                "dataInput": [
                    {"parameter": "points", "dataType": "entity/vector", "contentType": ["application/json"], "required": true}
                ],
                "dataOutput": [
                    {"name": "clusters", "dataType": "entity/label", "contentType": ["application/json"], "required": true}
                ],
                "pluginDependencies": [
                    {"parameter": "distance", "tags": ["distance", "!slow"], "required": false}
                ]
            }
        });
        let description: PluginDescription = serde_json::from_value(raw).unwrap();
        assert_eq!(description.name, "k-means");
        assert_eq!(description.entry_point.data_input[0].parameter, "points");
        assert_eq!(description.entry_point.data_output[0].name, "clusters");
        assert_eq!(
            description.entry_point.plugin_dependencies[0].tags,
            vec!["distance", "!slow"]
        );
    }
}
