//! Metrics drivers.
//!
//! `null` records nothing. `prometheus` counts served content by status and
//! exposes the counters at `GET /api/metrics` behind authentication. The
//! recorder is owned by the driver rather than installed globally, so several
//! servers can live in one process.

use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use rootcause::Report;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ServerError;
use crate::router::{RouteError, RouteTree, TrustZone};

/// Scrape endpoint for the prometheus driver.
pub const METRICS_PATH: &str = "/api/metrics";

/// Counter incremented for every content GET.
pub const SERVED_COUNTER: &str = "imagik_content_served_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsDriverKind {
    Null,
    Prometheus,
}

impl fmt::Display for MetricsDriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Prometheus => write!(f, "prometheus"),
        }
    }
}

impl FromStr for MetricsDriverKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" | "" => Ok(Self::Null),
            "prometheus" => Ok(Self::Prometheus),
            _ => Err(ServerError::UnknownMetricsDriver {
                name: s.to_string(),
            }),
        }
    }
}

/// Records serving metrics.
pub trait MetricsDriver: Send + Sync {
    fn kind(&self) -> MetricsDriverKind;

    /// Registers the driver's routes, if it has any.
    fn init_routes(&self, routes: &mut RouteTree) -> Result<(), Report<RouteError>>;

    /// Called once per content GET with the final status.
    fn record_serve(&self, status: StatusCode);
}

/// Builds the driver named by `kind`.
#[must_use]
pub fn from_kind(kind: MetricsDriverKind) -> Arc<dyn MetricsDriver> {
    match kind {
        MetricsDriverKind::Null => Arc::new(NullMetrics),
        MetricsDriverKind::Prometheus => Arc::new(PrometheusMetrics::new()),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsDriver for NullMetrics {
    fn kind(&self) -> MetricsDriverKind {
        MetricsDriverKind::Null
    }

    fn init_routes(&self, _routes: &mut RouteTree) -> Result<(), Report<RouteError>> {
        Ok(())
    }

    fn record_serve(&self, _status: StatusCode) {}
}

/// Prometheus text exposition backed by a private recorder.
pub struct PrometheusMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusMetrics {
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    /// Current exposition text.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsDriver for PrometheusMetrics {
    fn kind(&self) -> MetricsDriverKind {
        MetricsDriverKind::Prometheus
    }

    fn init_routes(&self, routes: &mut RouteTree) -> Result<(), Report<RouteError>> {
        routes.route_with_state(
            TrustZone::Authenticated,
            Method::GET,
            METRICS_PATH,
            scrape,
            self.handle.clone(),
        )
    }

    fn record_serve(&self, status: StatusCode) {
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!(SERVED_COUNTER, "status" => status.as_u16().to_string()).increment(1);
        });
    }
}

async fn scrape(State(handle): State<PrometheusHandle>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
