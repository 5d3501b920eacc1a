//! Prometheus metrics exposition
//!
//! Counters recorded by the library crates:
//!
//! - `auth_token_refresh_total` (counter): label `outcome`
//! - `auth_request_retries_total` (counter)
//! - `auth_logouts_total` (counter): label `kind`
//! - `auth_pin_lockouts_total` (counter)
//!
//! and by the driver itself:
//!
//! - `portal_commands_total` (counter): labels `command`, `outcome`

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record one driver command run.
pub fn record_command(command: &'static str, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    metrics::counter!("portal_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}
