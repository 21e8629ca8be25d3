use std::sync::LazyLock;

use prometheus::{IntCounter, Registry, register_int_counter};

pub static DISCOVERED_PLUGINS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "registry_discovered_plugins_total",
        "Number of plugin self descriptions successfully ingested"
    )
    .unwrap()
});

pub static DISCOVERY_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "registry_discovery_errors_total",
        "Number of failed discovery requests"
    )
    .unwrap()
});

pub static PURGED_PLUGINS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "registry_purged_plugins_total",
        "Number of plugins removed by the purge task"
    )
    .unwrap()
});

pub fn register_all() -> Registry {
    LazyLock::force(&DISCOVERED_PLUGINS_TOTAL);
    LazyLock::force(&DISCOVERY_ERRORS_TOTAL);
    LazyLock::force(&PURGED_PLUGINS_TOTAL);

    prometheus::default_registry().clone()
}
