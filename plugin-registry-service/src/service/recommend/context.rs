use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::model::recommendation::{
    AvailableData, DataItem, RecommendationContext, ResultQuality,
};
use crate::repo::plugin::PluginRepo;
use crate::repo::service::ServiceRepo;

/// Service id of the experiment backend used for context enrichment.
pub const BACKEND_SERVICE_ID: &str = "qhana-backend";

const MAX_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Enriches a sparse recommendation context with data fetched from the
/// experiment backend before the voters run.
pub struct ContextGatherer {
    service_repo: Arc<dyn ServiceRepo>,
    plugin_repo: Arc<dyn PluginRepo>,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendDataRef {
    #[serde(rename = "type")]
    data_type: Option<String>,
    content_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl BackendDataRef {
    /// Data references without type information are dropped.
    fn into_data_item(self) -> Option<DataItem> {
        Some(DataItem {
            data_type: self.data_type?,
            content_type: self.content_type?,
            name: self.name,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDetails {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result_quality: Option<String>,
    #[serde(default)]
    processor_name: Option<String>,
    #[serde(default)]
    processor_version: Option<String>,
    #[serde(default)]
    input_data: Vec<BackendDataRef>,
    #[serde(default)]
    output_data: Vec<BackendDataRef>,
}

impl ContextGatherer {
    pub fn new(
        service_repo: Arc<dyn ServiceRepo>,
        plugin_repo: Arc<dyn PluginRepo>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            service_repo,
            plugin_repo,
            client,
        }
    }

    /// Fetches the experiment data summary and the current step details in
    /// parallel, bounded by the timeout. Only successful fetches are merged
    /// and caller provided context fields always win.
    pub async fn gather(
        &self,
        mut context: RecommendationContext,
        timeout: Duration,
    ) -> RecommendationContext {
        let Some(experiment) = context.experiment.clone() else {
            return context;
        };
        let fetch_timeout = timeout.min(MAX_FETCH_TIMEOUT);

        let mut join_set: JoinSet<RecommendationContext> = JoinSet::new();
        {
            let service_repo = self.service_repo.clone();
            let client = self.client.clone();
            let experiment = experiment.clone();
            join_set.spawn(async move {
                fetch_available_data(service_repo, client, &experiment, fetch_timeout).await
            });
        }
        if let Some(step) = context.current_step.clone() {
            let service_repo = self.service_repo.clone();
            let plugin_repo = self.plugin_repo.clone();
            let client = self.client.clone();
            join_set.spawn(async move {
                fetch_step_details(service_repo, plugin_repo, client, &experiment, &step, fetch_timeout)
                    .await
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok(fetched))) => context.merge_fetched(fetched),
                Ok(Some(Err(join_error))) => {
                    warn!("Context enrichment task failed: {join_error}");
                }
                Ok(None) => break,
                Err(_) => {
                    join_set.abort_all();
                    break;
                }
            }
        }
        context
    }
}

async fn backend_url(service_repo: &Arc<dyn ServiceRepo>) -> Option<String> {
    match service_repo.get_by_service_id(BACKEND_SERVICE_ID).await {
        Ok(Some(service)) => Some(service.url.trim_end_matches('/').to_string()),
        Ok(None) => {
            warn!("No {BACKEND_SERVICE_ID} configured, could not fetch additional context");
            None
        }
        Err(err) => {
            warn!("Could not look up the {BACKEND_SERVICE_ID} service: {err}");
            None
        }
    }
}

/// Fetches the data summary of an experiment.
async fn fetch_available_data(
    service_repo: Arc<dyn ServiceRepo>,
    client: reqwest::Client,
    experiment: &str,
    timeout: Duration,
) -> RecommendationContext {
    let Some(backend) = backend_url(&service_repo).await else {
        return RecommendationContext::default();
    };
    let url = format!("{backend}/experiments/{experiment}/data-summary");
    let summary: Result<AvailableData, _> = async {
        client
            .get(&url)
            .timeout(timeout)
            .send()
            .await?
            .json::<AvailableData>()
            .await
    }
    .await;
    match summary {
        Ok(available_data) => RecommendationContext {
            available_data: Some(available_data),
            ..RecommendationContext::default()
        },
        Err(err) => {
            warn!("Error fetching the data summary for experiment {experiment}: {err}");
            RecommendationContext::default()
        }
    }
}

/// Fetches the details of an experiment step: input and output data, step
/// status, result quality and the processing plugin.
async fn fetch_step_details(
    service_repo: Arc<dyn ServiceRepo>,
    plugin_repo: Arc<dyn PluginRepo>,
    client: reqwest::Client,
    experiment: &str,
    step: &str,
    timeout: Duration,
) -> RecommendationContext {
    let Some(backend) = backend_url(&service_repo).await else {
        return RecommendationContext::default();
    };
    let url = format!("{backend}/experiments/{experiment}/timeline/{step}");
    let details: Result<StepDetails, _> = async {
        client
            .get(&url)
            .timeout(timeout)
            .send()
            .await?
            .json::<StepDetails>()
            .await
    }
    .await;
    let details = match details {
        Ok(details) => details,
        Err(err) => {
            warn!("Error fetching step {step} of experiment {experiment}: {err}");
            return RecommendationContext::default();
        }
    };

    let current_plugin = match (&details.processor_name, &details.processor_version) {
        (Some(name), Some(version)) => plugin_repo
            .get_by_identifier_and_version(name, version)
            .await
            .ok()
            .flatten()
            .map(|plugin| plugin.id),
        _ => None,
    };

    let input_data: Vec<DataItem> = details
        .input_data
        .into_iter()
        .filter_map(BackendDataRef::into_data_item)
        .collect();

    let status = details.status.as_deref().unwrap_or("PENDING");
    match status {
        "PENDING" | "UNKNOWN" => RecommendationContext::default(),
        "FAILURE" => RecommendationContext {
            step_success: Some(false),
            step_error: Some(true),
            current_plugin,
            step_input_data: input_data,
            ..RecommendationContext::default()
        },
        _ => {
            let output_data: Vec<DataItem> = details
                .output_data
                .into_iter()
                .filter_map(BackendDataRef::into_data_item)
                .collect();
            RecommendationContext {
                step_success: Some(true),
                step_error: Some(false),
                step_data_quality: Some(
                    details
                        .result_quality
                        .as_deref()
                        .and_then(ResultQuality::parse)
                        .unwrap_or(ResultQuality::Unknown),
                ),
                current_plugin,
                step_input_data: input_data,
                step_output_data: output_data,
                ..RecommendationContext::default()
            }
        }
    }
}
