//! Logging setup and Prometheus metrics for the daemon

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::info;

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when it is set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("Invalid log filter: {}", config.log_filter))?;

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(
        "Structured logging initialized - filter: {}, json: {}",
        config.log_filter, config.json_logs
    );
    Ok(())
}

/// Prometheus metrics exported by the HTTP API
#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    /// Requests by method, matched route and status code
    pub http_requests_total: IntCounterVec,
    /// Request latency by matched route
    pub http_request_duration_seconds: HistogramVec,
    /// Device status reports by reported status
    pub status_reports_total: IntCounterVec,
    /// Releases created through the API
    pub releases_created_total: IntCounter,
    /// Deployments created through the API
    pub deployments_created_total: IntCounter,
    /// Rollbacks, manual or automatic
    pub rollbacks_total: IntCounter,
}

impl ApiMetrics {
    /// Create and register every metric on a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("ota_http_requests_total", "HTTP requests handled"),
            &["method", "route", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ota_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["route"],
        )?;
        let status_reports_total = IntCounterVec::new(
            Opts::new("ota_status_reports_total", "Device status reports received"),
            &["status"],
        )?;
        let releases_created_total =
            IntCounter::new("ota_releases_created_total", "Firmware releases created")?;
        let deployments_created_total =
            IntCounter::new("ota_deployments_created_total", "Deployments created")?;
        let rollbacks_total = IntCounter::new("ota_rollbacks_total", "Deployments rolled back")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(status_reports_total.clone()))?;
        registry.register(Box::new(releases_created_total.clone()))?;
        registry.register(Box::new(deployments_created_total.clone()))?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            status_reports_total,
            releases_created_total,
            deployments_created_total,
            rollbacks_total,
        })
    }

    /// Record one finished request
    pub fn observe_request(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, route, status.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
    }

    /// Encode all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Middleware recording request counts and latency per matched route
pub async fn track_requests(
    State(metrics): State<Arc<ApiMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = request.method().to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    metrics.observe_request(&method, &route, response.status().as_u16(), started.elapsed());

    response
}
