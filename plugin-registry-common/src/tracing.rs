use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    /// Emit one JSON object per log line instead of the human readable format.
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set.
    pub default_env_filter: String,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: false,
            default_env_filter: "info".to_string(),
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::local_dev("plugin-registry")
    }
}

pub fn init_tracing_with_default_env_filter(config: &TracingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_env_filter));

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
