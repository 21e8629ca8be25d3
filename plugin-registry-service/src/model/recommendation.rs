use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A reference to a single piece of data, described by its data type and
/// content type (both may use `*` wildcards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub data_type: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// All data available in an experiment: data type mapped to the list of
/// content types it is available as.
pub type AvailableData = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultQuality {
    Unknown,
    Bad,
    Neutral,
    Good,
}

impl ResultQuality {
    pub fn parse(value: &str) -> Option<ResultQuality> {
        match value {
            "UNKNOWN" => Some(ResultQuality::Unknown),
            "BAD" => Some(ResultQuality::Bad),
            "NEUTRAL" => Some(ResultQuality::Neutral),
            "GOOD" => Some(ResultQuality::Good),
            _ => None,
        }
    }
}

/// The context a recommendation is computed for.
///
/// All fields are optional; the engine enriches a sparse caller provided
/// context with data fetched from the experiment backend, where the caller
/// provided values always win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationContext {
    /// Catalog id of the plugin the recommendation is relative to.
    pub current_plugin: Option<i64>,
    /// Data the recommendation should specifically consider.
    pub current_data: Vec<DataItem>,
    /// Input data of the current experiment step.
    pub step_input_data: Vec<DataItem>,
    /// Output data of the current experiment step.
    pub step_output_data: Vec<DataItem>,
    /// All data available in the experiment.
    pub available_data: Option<AvailableData>,
    /// Id (or URL) of the experiment in the backend.
    pub experiment: Option<String>,
    /// Id (or URL) of the current experiment step.
    pub current_step: Option<String>,
    pub step_success: Option<bool>,
    pub step_error: Option<bool>,
    pub step_data_quality: Option<ResultQuality>,
}

impl RecommendationContext {
    /// Merges a fetched context fragment into this context. Fields already
    /// present keep their value.
    pub fn merge_fetched(&mut self, fetched: RecommendationContext) {
        if self.current_plugin.is_none() {
            self.current_plugin = fetched.current_plugin;
        }
        if self.current_data.is_empty() {
            self.current_data = fetched.current_data;
        }
        if self.step_input_data.is_empty() {
            self.step_input_data = fetched.step_input_data;
        }
        if self.step_output_data.is_empty() {
            self.step_output_data = fetched.step_output_data;
        }
        if self.available_data.is_none() {
            self.available_data = fetched.available_data;
        }
        if self.experiment.is_none() {
            self.experiment = fetched.experiment;
        }
        if self.current_step.is_none() {
            self.current_step = fetched.current_step;
        }
        if self.step_success.is_none() {
            self.step_success = fetched.step_success;
        }
        if self.step_error.is_none() {
            self.step_error = fetched.step_error;
        }
        if self.step_data_quality.is_none() {
            self.step_data_quality = fetched.step_data_quality;
        }
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn caller_provided_fields_win_over_fetched_values() {
        let mut context = RecommendationContext {
            current_plugin: Some(1),
            ..RecommendationContext::default()
        };
        context.merge_fetched(RecommendationContext {
            current_plugin: Some(2),
            step_success: Some(true),
            ..RecommendationContext::default()
        });
        assert_eq!(context.current_plugin, Some(1));
        assert_eq!(context.step_success, Some(true));
    }

    #[test]
    fn result_quality_parses_known_values() {
        assert_eq!(ResultQuality::parse("GOOD"), Some(ResultQuality::Good));
        assert_eq!(ResultQuality::parse("fine"), None);
    }
}
