use std::collections::{BTreeMap, BTreeSet, HashSet};

use similar::TextDiff;

use super::version::{parse_version_lenient, parse_version_req};

/// Similarity ratio above which a `name` filter matches a plugin title.
pub const NAME_MATCHING_THRESHOLD: f32 = 0.8;

/// Batch size used when evaluating a filter over the whole catalog.
pub const FILTER_BATCH_SIZE: i64 = 500;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FilterError {
    #[error("The filter must be a JSON object: {0}")]
    InvalidJson(String),
    #[error("A filter object must contain exactly one key")]
    MultipleKeys,
    #[error("Unknown filter key '{0}'")]
    UnknownKey(String),
    #[error("The value of '{0}' must be a list of filters")]
    ExpectedList(&'static str),
    #[error("The value of '{0}' must be a filter object")]
    ExpectedObject(&'static str),
    #[error("The value of '{0}' must be a string")]
    ExpectedString(&'static str),
    #[error("Invalid version specifier: '{0}'")]
    InvalidVersionSpecifier(String),
}

/// The declarative plugin filter carried by template tabs.
///
/// Serialized as JSON: `{}` matches everything, every other level is an
/// object with exactly one of the keys `and`, `or`, `not`, `id`, `name`,
/// `tag`, `type` or `version`.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginFilter {
    All,
    And(Vec<PluginFilter>),
    Or(Vec<PluginFilter>),
    Not(Box<PluginFilter>),
    Id(String),
    Name(String),
    Tag(String),
    Type(String),
    Version(String),
}

/// The attributes of a plugin the filter language operates on.
#[derive(Debug, Clone)]
pub struct PluginMatchRow {
    pub id: i64,
    pub identifier: String,
    pub version: String,
    pub title: String,
    pub plugin_type: String,
    pub tags: HashSet<String>,
}

impl PluginMatchRow {
    pub fn full_id(&self) -> String {
        format!("{}@{}", self.identifier, self.version)
    }
}

impl PluginFilter {
    /// Parses a filter from its serialized string form. An empty string is
    /// treated like the empty filter (matches everything).
    pub fn parse(filter_string: &str) -> Result<PluginFilter, FilterError> {
        if filter_string.trim().is_empty() {
            return Ok(PluginFilter::All);
        }
        let value: serde_json::Value = serde_json::from_str(filter_string)
            .map_err(|err| FilterError::InvalidJson(err.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<PluginFilter, FilterError> {
        let object = value
            .as_object()
            .ok_or_else(|| FilterError::InvalidJson(value.to_string()))?;
        if object.is_empty() {
            return Ok(PluginFilter::All);
        }
        if object.len() > 1 {
            return Err(FilterError::MultipleKeys);
        }
        let (key, value) = object.iter().next().expect("non-empty object");
        match key.as_str() {
            "and" => Ok(PluginFilter::And(Self::filter_list("and", value)?)),
            "or" => Ok(PluginFilter::Or(Self::filter_list("or", value)?)),
            "not" => {
                if !value.is_object() {
                    return Err(FilterError::ExpectedObject("not"));
                }
                Ok(PluginFilter::Not(Box::new(Self::from_value(value)?)))
            }
            "id" => Ok(PluginFilter::Id(Self::string_value("id", value)?)),
            "name" => Ok(PluginFilter::Name(Self::string_value("name", value)?)),
            "tag" => Ok(PluginFilter::Tag(Self::string_value("tag", value)?)),
            "type" => Ok(PluginFilter::Type(Self::string_value("type", value)?)),
            "version" => {
                let specifier = Self::string_value("version", value)?;
                parse_version_req(&specifier)
                    .map_err(|_| FilterError::InvalidVersionSpecifier(specifier.clone()))?;
                Ok(PluginFilter::Version(specifier))
            }
            other => Err(FilterError::UnknownKey(other.to_string())),
        }
    }

    fn filter_list(key: &'static str, value: &serde_json::Value) -> Result<Vec<PluginFilter>, FilterError> {
        value
            .as_array()
            .ok_or(FilterError::ExpectedList(key))?
            .iter()
            .map(Self::from_value)
            .collect()
    }

    fn string_value(key: &'static str, value: &serde_json::Value) -> Result<String, FilterError> {
        value
            .as_str()
            .map(ToString::to_string)
            .ok_or(FilterError::ExpectedString(key))
    }

    /// Selects the matching plugin ids from a batch by recursive set algebra.
    ///
    /// `not` is the complement within the batch; empty `and`/`or` lists match
    /// nothing.
    pub fn select(&self, batch: &BTreeMap<i64, PluginMatchRow>) -> BTreeSet<i64> {
        match self {
            PluginFilter::All => batch.keys().copied().collect(),
            PluginFilter::And(children) => {
                let mut children = children.iter();
                let Some(first) = children.next() else {
                    return BTreeSet::new();
                };
                let mut result = first.select(batch);
                for child in children {
                    let selected = child.select(batch);
                    result.retain(|id| selected.contains(id));
                }
                result
            }
            PluginFilter::Or(children) => children
                .iter()
                .flat_map(|child| child.select(batch))
                .collect(),
            PluginFilter::Not(child) => {
                let selected = child.select(batch);
                batch
                    .keys()
                    .copied()
                    .filter(|id| !selected.contains(id))
                    .collect()
            }
            _ => batch
                .iter()
                .filter(|(_, row)| self.matches_leaf(row))
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    fn matches_leaf(&self, row: &PluginMatchRow) -> bool {
        match self {
            PluginFilter::Id(value) => {
                let full_id = row.full_id();
                full_id == *value || row.identifier == *value
            }
            PluginFilter::Name(value) => name_similarity(&row.title, value) > NAME_MATCHING_THRESHOLD,
            PluginFilter::Tag(value) => row.tags.contains(value),
            PluginFilter::Type(value) => row.plugin_type.eq_ignore_ascii_case(value),
            PluginFilter::Version(specifier) => {
                let Ok(requirement) = parse_version_req(specifier) else {
                    tracing::warn!("Invalid version specifier: '{specifier}'");
                    return false;
                };
                match parse_version_lenient(&row.version) {
                    Some(version) => requirement.matches(&version),
                    None => false,
                }
            }
            _ => unreachable!("matches_leaf is only called for leaf filters"),
        }
    }

    /// Whether a single plugin matches the filter (`not` behaves as plain
    /// negation here).
    pub fn matches(&self, row: &PluginMatchRow) -> bool {
        match self {
            PluginFilter::All => true,
            PluginFilter::And(children) => {
                !children.is_empty() && children.iter().all(|c| c.matches(row))
            }
            PluginFilter::Or(children) => children.iter().any(|c| c.matches(row)),
            PluginFilter::Not(child) => !child.matches(row),
            _ => self.matches_leaf(row),
        }
    }
}

/// Similarity ratio between two names (the Ratcliff/Obershelp measure).
pub fn name_similarity(a: &str, b: &str) -> f32 {
    TextDiff::from_chars(a, b).ratio()
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    fn row(id: i64, identifier: &str, version: &str, title: &str, tags: &[&str]) -> PluginMatchRow {
        PluginMatchRow {
            id,
            identifier: identifier.to_string(),
            version: version.to_string(),
            title: title.to_string(),
            plugin_type: "processing".to_string(),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    fn batch() -> BTreeMap<i64, PluginMatchRow> {
        [
            row(1, "k-means", "0.9", "K-Means", &["clustering"]),
            row(2, "k-means", "1.2", "K-Means", &["clustering"]),
            row(3, "k-means", "2.0", "K-Means", &["clustering"]),
            row(4, "dbscan", "1.1", "DBSCAN", &["clustering"]),
            row(5, "csv-loader", "1.0", "CSV Loader", &["data-loading"]),
        ]
        .into_iter()
        .map(|row| (row.id, row))
        .collect()
    }

    fn parse(json: &str) -> PluginFilter {
        PluginFilter::parse(json).unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(parse("{}").select(&batch()).len(), 5);
        assert_eq!(parse("").select(&batch()).len(), 5);
    }

    #[test]
    fn empty_and_or_match_nothing() {
        assert!(parse(r#"{"and": []}"#).select(&batch()).is_empty());
        assert!(parse(r#"{"or": []}"#).select(&batch()).is_empty());
    }

    #[test]
    fn single_element_and_behaves_like_the_element() {
        let batch = batch();
        let inner = parse(r#"{"tag": "clustering"}"#);
        let wrapped = parse(r#"{"and": [{"tag": "clustering"}]}"#);
        assert_eq!(inner.select(&batch), wrapped.select(&batch));
    }

    #[test]
    fn not_is_the_complement_within_the_batch() {
        let batch = batch();
        let selected = parse(r#"{"tag": "clustering"}"#).select(&batch);
        let complement = parse(r#"{"not": {"tag": "clustering"}}"#).select(&batch);
        assert!(selected.is_disjoint(&complement));
        assert_eq!(selected.len() + complement.len(), batch.len());
        for (id, row) in &batch {
            assert_ne!(
                parse(r#"{"tag": "clustering"}"#).matches(row),
                parse(r#"{"not": {"tag": "clustering"}}"#).matches(row),
                "negation must flip the result for plugin {id}"
            );
        }
    }

    #[test]
    fn id_filter_matches_full_id_and_bare_identifier() {
        let batch = batch();
        assert_eq!(
            parse(r#"{"id": "k-means@1.2"}"#).select(&batch),
            BTreeSet::from([2])
        );
        assert_eq!(
            parse(r#"{"id": "k-means"}"#).select(&batch),
            BTreeSet::from([1, 2, 3])
        );
        assert!(parse(r#"{"id": "k-means@9.9"}"#).select(&batch).is_empty());
    }

    #[test]
    fn version_filter_follows_the_specifier_set() {
        let batch = batch();
        let selected = parse(r#"{"version": ">=1.0.0,<2.0.0"}"#).select(&batch);
        assert_eq!(selected, BTreeSet::from([2, 4, 5]));
    }

    #[test]
    fn tab_filter_with_tag_and_version_range() {
        // catalog: k-means@0.9, k-means@1.2, k-means@2.0, dbscan@1.1
        let batch = batch();
        let filter = parse(r#"{"and": [{"tag": "clustering"}, {"version": ">=1.0.0,<2.0.0"}]}"#);
        assert_eq!(filter.select(&batch), BTreeSet::from([2, 4]));
    }

    #[test]
    fn name_filter_uses_the_similarity_ratio() {
        let batch = batch();
        assert_eq!(
            parse(r#"{"name": "K-Means"}"#).select(&batch),
            BTreeSet::from([1, 2, 3])
        );
        // "K-Mean" is well above the 0.8 ratio against "K-Means"
        assert_eq!(
            parse(r#"{"name": "K-Mean"}"#).select(&batch),
            BTreeSet::from([1, 2, 3])
        );
        assert!(parse(r#"{"name": "completely different"}"#).select(&batch).is_empty());
    }

    #[test]
    fn type_filter_is_case_insensitive() {
        let batch = batch();
        assert_eq!(parse(r#"{"type": "Processing"}"#).select(&batch).len(), 5);
        assert!(parse(r#"{"type": "visualization"}"#).select(&batch).is_empty());
    }

    #[test]
    fn multiple_keys_are_rejected() {
        let result = PluginFilter::parse(r#"{"tag": "a", "type": "b"}"#);
        assert_eq!(result, Err(FilterError::MultipleKeys));
    }

    #[test]
    fn invalid_version_specifiers_are_rejected() {
        let result = PluginFilter::parse(r#"{"version": "not-a-spec"}"#);
        assert!(matches!(result, Err(FilterError::InvalidVersionSpecifier(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = PluginFilter::parse(r#"{"nope": "x"}"#);
        assert!(matches!(result, Err(FilterError::UnknownKey(_))));
    }

    #[test]
    fn and_or_values_must_be_lists() {
        assert_eq!(
            PluginFilter::parse(r#"{"and": {"tag": "a"}}"#),
            Err(FilterError::ExpectedList("and"))
        );
        assert_eq!(
            PluginFilter::parse(r#"{"or": "x"}"#),
            Err(FilterError::ExpectedList("or"))
        );
    }
}
