// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and seed the cache gauge.
    pub fn init(cached_months: usize) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        gauge!("ssi_cached_months").set(cached_months as f64);
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty exposition.
    /// Routers in tests use this so they never race over the global recorder.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    crate::ssi::ensure_metrics_described();
    describe_counter!("api_subscriptions_total", "Subscribe/unsubscribe requests by action and result.");
    describe_counter!("api_market_data_errors_total", "Dashboard requests that found no cached data.");
}
