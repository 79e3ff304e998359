use std::sync::LazyLock;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry,
};
use prometheus::{
    Encoder, Histogram, IntCounterVec, IntGauge, Registry as PrometheusRegistry, TextEncoder,
};
use tracing::error;

use crate::proxy::Error;

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

pub struct MetricsProvider {
    registry: PrometheusRegistry,
    pub metric_http_request_total: IntCounterVec,
    pub metric_http_request_duration: Histogram,
    pub metric_http_request_in_flight: IntGauge,
    pub metric_upstream_request_total: IntCounterVec,
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = PrometheusRegistry::new();

        let metric_http_request_total = register_int_counter_vec_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests made.",
            &["route"],
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_requests_total metric: {error}");
            Error::Internal(String::from("Unable to create http_requests_total metric"))
        })?;

        let metric_http_request_duration = register_histogram_with_registry!(
            "http_request_duration_ms",
            "The HTTP request latencies in milliseconds.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_request_duration metric: {error}");
            Error::Internal(String::from(
                "Unable to create http_request_duration metric",
            ))
        })?;

        let metric_http_request_in_flight = register_int_gauge_with_registry!(
            "http_requests_in_flight",
            "The current number of in-flight HTTP connections.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_requests_in_flight metric: {error}");
            Error::Internal(String::from(
                "Unable to create http_requests_in_flight metric",
            ))
        })?;

        let metric_upstream_request_total = register_int_counter_vec_with_registry!(
            "upstream_requests_total",
            "Total number of requests sent to upstream registries and token realms.",
            &["kind", "outcome"],
            &registry
        )
        .map_err(|error| {
            error!("Unable to create upstream_requests_total metric: {error}");
            Error::Internal(String::from(
                "Unable to create upstream_requests_total metric",
            ))
        })?;

        Ok(Self {
            registry,
            metric_http_request_total,
            metric_http_request_duration,
            metric_http_request_in_flight,
            metric_upstream_request_total,
        })
    }

    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|error| Error::Internal(format!("Unable to encode metrics: {error}")))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
