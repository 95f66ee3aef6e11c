//! Prometheus metrics exposition
//!
//! - `clb_refresh_total` (counter): label `outcome`
//! - `clb_refresh_duration_seconds` (histogram): label `outcome`
//! - `clb_auth_states` (gauge): users in the auth-state store

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries from 10ms to 60s: one refresh is at most two IdP
/// round trips bounded by the client timeout.
const DURATION_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("clb_refresh_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .context("setting histogram buckets")
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("installing Prometheus recorder")
}

/// Record one user's refresh with its outcome label.
pub fn record_refresh(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("clb_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("clb_refresh_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

/// Record how many users the store holds.
pub fn set_auth_states(count: usize) {
    metrics::gauge!("clb_auth_states").set(count as f64);
}
