//! Prometheus metrics for the PD cert assistant
//!
//! # Exported metrics
//! - `pd_assistant_config` (gauge): always 1, labeled by version.
//! - `pd_assistant_local_ips_count` (gauge): addresses found in local CiliumNodes.
//! - `pd_assistant_all_ips_count` (gauge): addresses aggregated from all PD assistants.
//! - `pd_assistant_fetch_errors_total` (counter): peer fetch failures labeled by peer and endpoint.
//! - `pd_assistant_consensus_errors_total` (counter): cycles skipped because peers disagreed.
//! - `pd_assistant_cert_update_errors_total` (counter): failed certificate get/create/update.
//! - `pd_assistant_reconcile_cycles_total` (counter): cycle outcomes.
//! - `pd_assistant_reconcile_duration_seconds` (histogram): cycle duration.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ConfigLabels {
    pub version: String,
}

/// Labels for peer fetch errors
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FetchLabels {
    /// Peer base URL
    pub pd_assistant: String,
    /// "local" or "all"
    pub endpoint: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

pub static CONFIG_INFO: Lazy<Family<ConfigLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static LOCAL_IPS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static ALL_IPS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static FETCH_ERRORS_TOTAL: Lazy<Family<FetchLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CONSENSUS_ERRORS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static CERT_UPDATE_ERRORS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static RECONCILE_CYCLES_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    // 10ms .. ~5.5 min across 16 buckets; a cycle is bounded by per-call timeouts.
    Histogram::new(exponential_buckets(0.01, 2.0, 16))
});

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::with_prefix("pd_assistant");

    registry.register("config", "App config info", CONFIG_INFO.clone());
    registry.register(
        "local_ips_count",
        "Number of IP addresses from local Cilium nodes",
        LOCAL_IPS.clone(),
    );
    registry.register(
        "all_ips_count",
        "Number of IP addresses from all PD Assistants",
        ALL_IPS.clone(),
    );
    registry.register(
        "fetch_errors",
        "Total number of errors fetching data from PD Assistants",
        FETCH_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "consensus_errors",
        "Total number of failed IP address consensus checks",
        CONSENSUS_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "cert_update_errors",
        "Total number of certificate update errors",
        CERT_UPDATE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "reconcile_cycles",
        "Total number of reconciliation cycles by outcome",
        RECONCILE_CYCLES_TOTAL.clone(),
    );
    registry.register(
        "reconcile_duration_seconds",
        "Duration of reconciliation cycles in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );

    registry
});

/// Publish the version info gauge and pre-create zero-valued counters.
pub fn init(version: &str) {
    CONFIG_INFO
        .get_or_create(&ConfigLabels {
            version: version.to_string(),
        })
        .set(1);
    Lazy::force(&CERT_UPDATE_ERRORS_TOTAL);
    Lazy::force(&REGISTRY);
}

pub fn set_local_ips(count: usize) {
    LOCAL_IPS.set(count as i64);
}

pub fn set_all_ips(count: usize) {
    ALL_IPS.set(count as i64);
}

pub fn inc_fetch_error(pd_assistant: &str, endpoint: &str) {
    let labels = FetchLabels {
        pd_assistant: pd_assistant.to_string(),
        endpoint: endpoint.to_string(),
    };
    FETCH_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Current fetch error count for a peer/endpoint pair
pub fn fetch_errors(pd_assistant: &str, endpoint: &str) -> u64 {
    let labels = FetchLabels {
        pd_assistant: pd_assistant.to_string(),
        endpoint: endpoint.to_string(),
    };
    FETCH_ERRORS_TOTAL.get_or_create(&labels).get()
}

pub fn inc_consensus_error() {
    CONSENSUS_ERRORS_TOTAL.inc();
}

pub fn inc_cert_update_error() {
    CERT_UPDATE_ERRORS_TOTAL.inc();
}

pub fn inc_cycle_outcome(outcome: &str) {
    let labels = OutcomeLabels {
        outcome: outcome.to_string(),
    };
    RECONCILE_CYCLES_TOTAL.get_or_create(&labels).inc();
}

pub fn cycle_outcomes(outcome: &str) -> u64 {
    let labels = OutcomeLabels {
        outcome: outcome.to_string(),
    };
    RECONCILE_CYCLES_TOTAL.get_or_create(&labels).get()
}

pub fn observe_reconcile_duration_seconds(seconds: f64) {
    RECONCILE_DURATION_SECONDS.observe(seconds);
}

/// Render the registry in OpenMetrics text format.
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_counter_per_peer() {
        let peer = "https://pd-assistant.metrics-test.example.com:443";
        assert_eq!(fetch_errors(peer, "local"), 0);
        inc_fetch_error(peer, "local");
        inc_fetch_error(peer, "local");
        inc_fetch_error(peer, "all");
        assert_eq!(fetch_errors(peer, "local"), 2);
        assert_eq!(fetch_errors(peer, "all"), 1);
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        init("test-version");
        set_local_ips(3);
        inc_cycle_outcome("unchanged");

        let text = encode().unwrap();
        assert!(text.contains("pd_assistant_config{version=\"test-version\"} 1"));
        assert!(text.contains("pd_assistant_local_ips_count"));
        assert!(text.contains("pd_assistant_cert_update_errors_total"));
        assert!(text.contains("pd_assistant_reconcile_cycles_total{outcome=\"unchanged\"}"));
    }

    #[test]
    fn test_cycle_outcome_counter() {
        let before = cycle_outcomes("metrics-test-outcome");
        inc_cycle_outcome("metrics-test-outcome");
        assert_eq!(cycle_outcomes("metrics-test-outcome"), before + 1);
    }
}
