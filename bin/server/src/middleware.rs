//! Request pipeline.
//!
//! Two layers of middleware wrap every handler:
//! - the global chain (`MiddlewareChain`), applied to the whole router
//! - zone stages (`ZoneStage`), applied per binding by `ZoneLayers`
//!
//! Stages are plain values. The chain folds them into tower layers in order,
//! outermost first.

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use futures::FutureExt;
use imagik_core::RequestId;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;

use crate::auth::{AuthDriver, middleware::enforce};
use crate::csrf::{CsrfGuard, protect};
use crate::router::TrustZone;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stages of the global chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalStage {
    /// Turns handler panics into a 500.
    Recovery,
    /// Trusts `Forwarded`/`X-Forwarded-*` headers from the reverse proxy.
    ProxyHeaders,
    /// gzip response bodies.
    Compression,
    /// One log line per request.
    RequestLog,
}

impl fmt::Display for GlobalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovery => write!(f, "recovery"),
            Self::ProxyHeaders => write!(f, "proxy_headers"),
            Self::Compression => write!(f, "compression"),
            Self::RequestLog => write!(f, "request_log"),
        }
    }
}

/// Chain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The first stage is not `Recovery` (or the chain is empty).
    RecoveryNotOutermost { first: Option<GlobalStage> },
    /// A stage appears twice.
    DuplicateStage { stage: GlobalStage },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecoveryNotOutermost { first: Some(first) } => {
                write!(f, "recovery must be the outermost stage, found {first}")
            }
            Self::RecoveryNotOutermost { first: None } => {
                write!(f, "recovery must be the outermost stage, chain is empty")
            }
            Self::DuplicateStage { stage } => write!(f, "stage {stage} appears twice"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Ordered global middleware, outermost first.
#[derive(Debug, Clone)]
pub struct MiddlewareChain {
    stages: Vec<GlobalStage>,
}

impl MiddlewareChain {
    /// Validates a chain.
    ///
    /// # Errors
    ///
    /// Returns `ChainError` if `Recovery` is not first or a stage repeats.
    pub fn new(stages: Vec<GlobalStage>) -> Result<Self, ChainError> {
        if stages.first() != Some(&GlobalStage::Recovery) {
            return Err(ChainError::RecoveryNotOutermost {
                first: stages.first().copied(),
            });
        }
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(*stage) {
                return Err(ChainError::DuplicateStage { stage: *stage });
            }
        }
        Ok(Self { stages })
    }

    /// Recovery, proxy headers, compression, request log.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                GlobalStage::Recovery,
                GlobalStage::ProxyHeaders,
                GlobalStage::Compression,
                GlobalStage::RequestLog,
            ],
        }
    }

    #[must_use]
    pub fn stages(&self) -> &[GlobalStage] {
        &self.stages
    }

    /// Wraps `router` in every stage. The last layer added is the outermost,
    /// so the fold runs innermost first.
    pub fn apply(&self, router: Router) -> Router {
        self.stages
            .iter()
            .rev()
            .fold(router, |router, stage| match stage {
                GlobalStage::Recovery => router.layer(CatchPanicLayer::custom(recover)),
                GlobalStage::ProxyHeaders => {
                    router.layer(middleware::from_fn(normalize_proxy_headers))
                }
                GlobalStage::Compression => router.layer(CompressionLayer::new()),
                GlobalStage::RequestLog => router.layer(middleware::from_fn(log_request)),
            })
    }
}

fn recover(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %message, "handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

/// Client address after proxy headers were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Scheme reported by the reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedProto(pub String);

fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim().trim_matches('"');
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

/// Value of `key=` in the first element of a `Forwarded` header.
fn forwarded_param<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    let value = headers.get(header::FORWARDED)?.to_str().ok()?;
    let first = value.split(',').next()?;
    first.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then_some(v.trim())
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address claimed by proxy headers, most specific first:
/// `Forwarded: for=`, the first `X-Forwarded-For` entry, then `X-Real-IP`.
#[must_use]
pub fn forwarded_client(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(addr) = forwarded_param(headers, "for").and_then(parse_addr) {
        return Some(addr);
    }
    if let Some(addr) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(parse_addr)
    {
        return Some(addr);
    }
    header_str(headers, "x-real-ip").and_then(parse_addr)
}

fn forwarded_proto(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-proto")
        .or_else(|| header_str(headers, "x-forwarded-scheme"))
        .or_else(|| forwarded_param(headers, "proto").map(|v| v.trim_matches('"')))
        .map(str::to_ascii_lowercase)
}

async fn normalize_proxy_headers(mut request: Request, next: Next) -> Response {
    let client = forwarded_client(request.headers()).or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    });
    if let Some(client) = client {
        request.extensions_mut().insert(ClientAddr(client));
    }
    if let Some(proto) = forwarded_proto(request.headers()) {
        request.extensions_mut().insert(ForwardedProto(proto));
    }
    if let Some(host) = request.headers().get("x-forwarded-host").cloned() {
        request.headers_mut().insert(header::HOST, host);
    }
    next.run(request).await
}

async fn log_request(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    request.extensions_mut().insert(request_id);

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    let remote = request
        .extensions()
        .get::<ClientAddr>()
        .map_or_else(|| "-".to_string(), |ClientAddr(addr)| addr.to_string());

    let started = Instant::now();
    // Recovery sits outside this stage, so a panic is logged here and re-raised.
    let outcome = AssertUnwindSafe(next.run(request)).catch_unwind().await;
    let took_ms = started.elapsed().as_millis();
    let status = outcome
        .as_ref()
        .map_or(StatusCode::INTERNAL_SERVER_ERROR, Response::status);

    tracing::info!(
        request_id = %request_id,
        method = %method,
        remote = %remote,
        path = %path,
        status = status.as_u16(),
        took_ms = took_ms as u64,
        "request"
    );

    let mut response = match outcome {
        Ok(response) => response,
        Err(panic) => std::panic::resume_unwind(panic),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Per-zone stages, run between the global chain and the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStage {
    /// Delegates to the configured auth driver.
    Authenticate,
    /// Double-submit CSRF check.
    Csrf,
}

/// What each trust zone is wrapped in.
#[derive(Clone)]
pub struct ZoneLayers {
    driver: Arc<dyn AuthDriver>,
    csrf: Option<CsrfGuard>,
}

impl ZoneLayers {
    #[must_use]
    pub fn new(driver: Arc<dyn AuthDriver>, csrf: Option<CsrfGuard>) -> Self {
        Self { driver, csrf }
    }

    /// Stages for `zone`, outermost first.
    #[must_use]
    pub fn stages(&self, zone: TrustZone) -> Vec<ZoneStage> {
        match zone {
            TrustZone::Public => Vec::new(),
            TrustZone::Authenticated => vec![ZoneStage::Authenticate],
            TrustZone::Privileged if self.csrf.is_some() => {
                vec![ZoneStage::Authenticate, ZoneStage::Csrf]
            }
            TrustZone::Privileged => vec![ZoneStage::Authenticate],
        }
    }

    /// Wraps a single binding's handler in its zone's stages.
    ///
    /// Uses `route_layer` so the stages only run for matched methods; an
    /// unauthenticated caller still gets a 405 for a method nobody serves.
    pub fn wrap(&self, zone: TrustZone, handler: MethodRouter) -> MethodRouter {
        self.stages(zone)
            .into_iter()
            .rev()
            .fold(handler, |handler, stage| match (stage, &self.csrf) {
                (ZoneStage::Authenticate, _) => handler.route_layer(
                    middleware::from_fn_with_state(Arc::clone(&self.driver), enforce),
                ),
                (ZoneStage::Csrf, Some(guard)) => {
                    handler.route_layer(middleware::from_fn_with_state(guard.clone(), protect))
                }
                (ZoneStage::Csrf, None) => handler,
            })
    }
}
