//! Prometheus rendering for `--metrics`
//!
//! The session layer records its counters through the `metrics` facade; this
//! installs a recorder so a single CLI run can print what it recorded.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

