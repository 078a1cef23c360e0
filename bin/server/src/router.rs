//! Route tree partitioned into trust zones.
//!
//! Every route is registered as a `Binding` of zone, method and pattern to a
//! handler. The tree checks its invariants at registration time, so the
//! `axum::Router` produced by [`RouteTree::into_router`] never panics on
//! overlapping routes.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::handler::Handler;
use axum::http::Method;
use axum::routing::{MethodFilter, MethodRouter, on};
use rootcause::Report;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::middleware::ZoneLayers;

/// Prefix every privileged route lives under.
pub const PRIVILEGED_PREFIX: &str = "/api/priv/";

/// Authentication requirement shared by a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustZone {
    /// Reachable by anyone.
    Public,
    /// Requires the auth driver to accept the request.
    Authenticated,
    /// Authenticated, plus CSRF protection when enabled.
    Privileged,
}

impl fmt::Display for TrustZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Privileged => write!(f, "privileged"),
        }
    }
}

/// Route tree invariant violations.
#[derive(Debug)]
pub enum RouteError {
    /// The `(method, pattern)` pair is already bound.
    Duplicate { method: Method, pattern: String },
    /// Same shape as an existing pattern but with different parameter names.
    ConflictingPattern { existing: String, pattern: String },
    /// The pattern is not a usable path.
    InvalidPattern { pattern: String, reason: String },
    /// The pattern does not belong in the requested zone.
    ZoneMismatch { zone: TrustZone, pattern: String },
    /// axum cannot route this method.
    UnsupportedMethod { method: Method },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { method, pattern } => {
                write!(f, "route {method} {pattern} is already registered")
            }
            Self::ConflictingPattern { existing, pattern } => {
                write!(f, "pattern '{pattern}' conflicts with '{existing}'")
            }
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid pattern '{pattern}': {reason}")
            }
            Self::ZoneMismatch { zone, pattern } => {
                write!(f, "pattern '{pattern}' cannot be registered in the {zone} zone")
            }
            Self::UnsupportedMethod { method } => write!(f, "unsupported method {method}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// One `(zone, method, pattern) -> handler` entry.
pub struct Binding {
    zone: TrustZone,
    method: Method,
    pattern: String,
    handler: Option<MethodRouter>,
}

impl Binding {
    /// Binds a stateless handler.
    pub fn new<H, T>(zone: TrustZone, method: Method, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let handler = MethodFilter::try_from(method.clone())
            .ok()
            .map(|filter| on(filter, handler));
        Self {
            zone,
            method,
            pattern: pattern.to_string(),
            handler,
        }
    }

    /// Binds a handler that extracts `State<S>`.
    pub fn with_state<H, T, S>(
        zone: TrustZone,
        method: Method,
        pattern: &str,
        handler: H,
        state: S,
    ) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let handler = MethodFilter::try_from(method.clone())
            .ok()
            .map(|filter| on(filter, handler).with_state(state));
        Self {
            zone,
            method,
            pattern: pattern.to_string(),
            handler,
        }
    }

    /// Raises the body limit extractors such as `Multipart` enforce.
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.handler = self
            .handler
            .map(|handler| handler.layer(DefaultBodyLimit::max(limit)));
        self
    }

    #[must_use]
    pub fn zone(&self) -> TrustZone {
        self.zone
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("zone", &self.zone)
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Erases parameter names so `/a/{x}` and `/a/{y}` compare equal.
fn normalize(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with("{*") && segment.ends_with('}') {
                "{*}"
            } else if segment.starts_with('{') && segment.ends_with('}') {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn validate(binding: &Binding) -> Result<(), RouteError> {
    let pattern = binding.pattern.as_str();
    if !pattern.starts_with('/') {
        return Err(RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
    let privileged = pattern.starts_with(PRIVILEGED_PREFIX);
    let under_priv = pattern.starts_with(PRIVILEGED_PREFIX.trim_end_matches('/'));
    let misplaced = match binding.zone {
        TrustZone::Privileged => !privileged,
        TrustZone::Public | TrustZone::Authenticated => under_priv,
    };
    if misplaced {
        return Err(RouteError::ZoneMismatch {
            zone: binding.zone,
            pattern: pattern.to_string(),
        });
    }
    if binding.handler.is_none() {
        return Err(RouteError::UnsupportedMethod {
            method: binding.method.clone(),
        });
    }
    Ok(())
}

/// Ordered set of bindings, checked on insertion.
#[derive(Default)]
pub struct RouteTree {
    bindings: Vec<Binding>,
    bound: HashSet<(Method, String)>,
    shapes: HashMap<String, String>,
}

impl RouteTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single stateless route.
    ///
    /// # Errors
    ///
    /// See [`RouteTree::register`].
    pub fn route<H, T>(
        &mut self,
        zone: TrustZone,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), Report<RouteError>>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.register([Binding::new(zone, method, pattern, handler)])
    }

    /// Registers a single route whose handler extracts `State<S>`.
    ///
    /// # Errors
    ///
    /// See [`RouteTree::register`].
    pub fn route_with_state<H, T, S>(
        &mut self,
        zone: TrustZone,
        method: Method,
        pattern: &str,
        handler: H,
        state: S,
    ) -> Result<(), Report<RouteError>>
    where
        H: Handler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        self.register([Binding::with_state(zone, method, pattern, handler, state)])
    }

    /// Adds every binding, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first invariant violation found, checking the batch
    /// against both the tree and itself. The tree is unchanged on error.
    pub fn register(
        &mut self,
        bindings: impl IntoIterator<Item = Binding>,
    ) -> Result<(), Report<RouteError>> {
        let batch: Vec<Binding> = bindings.into_iter().collect();
        let mut bound = HashSet::new();
        let mut shapes: HashMap<String, String> = HashMap::new();

        for binding in &batch {
            validate(binding)?;
            let shape = normalize(&binding.pattern);
            let existing = self.shapes.get(&shape).or_else(|| shapes.get(&shape));
            if let Some(existing) = existing.filter(|e| **e != binding.pattern) {
                return Err(RouteError::ConflictingPattern {
                    existing: existing.clone(),
                    pattern: binding.pattern.clone(),
                }
                .into());
            }
            let key = (binding.method.clone(), shape.clone());
            if self.bound.contains(&key) || !bound.insert(key) {
                return Err(RouteError::Duplicate {
                    method: binding.method.clone(),
                    pattern: binding.pattern.clone(),
                }
                .into());
            }
            shapes.insert(shape, binding.pattern.clone());
        }

        self.bound.extend(bound);
        self.shapes.extend(shapes);
        self.bindings.extend(batch);
        Ok(())
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Returns true if `(method, pattern)` is bound.
    #[must_use]
    pub fn contains(&self, method: &Method, pattern: &str) -> bool {
        self.bound.contains(&(method.clone(), normalize(pattern)))
    }

    /// Zone of the binding for `(method, pattern)`, if any.
    #[must_use]
    pub fn zone_of(&self, method: &Method, pattern: &str) -> Option<TrustZone> {
        let shape = normalize(pattern);
        self.bindings
            .iter()
            .find(|b| &b.method == method && normalize(&b.pattern) == shape)
            .map(Binding::zone)
    }

    /// Builds the router, wrapping each binding in its zone's stages.
    ///
    /// Bindings sharing a pattern are merged into one `MethodRouter`, so a
    /// public GET and an authenticated PUT on the same path coexist.
    pub fn into_router(self, layers: &ZoneLayers) -> Router {
        let mut grouped: BTreeMap<String, MethodRouter> = BTreeMap::new();
        for binding in self.bindings {
            let Some(handler) = binding.handler else {
                continue;
            };
            tracing::debug!(
                zone = %binding.zone,
                method = %binding.method,
                pattern = %binding.pattern,
                "registered route"
            );
            let wrapped = layers.wrap(binding.zone, handler);
            let merged = match grouped.remove(&binding.pattern) {
                Some(existing) => existing.merge(wrapped),
                None => wrapped,
            };
            grouped.insert(binding.pattern, merged);
        }
        grouped
            .into_iter()
            .fold(Router::new(), |router, (pattern, method_router)| {
                router.route(&pattern, method_router)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::null::NullAuth;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "ok"
    }

    async fn other() -> &'static str {
        "other"
    }

    fn open_layers() -> ZoneLayers {
        ZoneLayers::new(Arc::new(NullAuth::new()), None)
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/a", ok)
            .expect("first");

        let err = tree
            .route(TrustZone::Public, Method::GET, "/a", ok)
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            RouteError::Duplicate { .. }
        ));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn same_pattern_different_method_is_allowed() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/{*path}", ok)
            .expect("get");
        tree.route(TrustZone::Authenticated, Method::PUT, "/{*path}", ok)
            .expect("put");

        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree.zone_of(&Method::PUT, "/{*path}"),
            Some(TrustZone::Authenticated)
        );
    }

    #[test]
    fn parameter_names_are_erased_for_comparison() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/files/{id}", ok)
            .expect("first");

        let err = tree
            .route(TrustZone::Public, Method::PUT, "/files/{name}", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::ConflictingPattern { .. }
        ));
        assert!(tree.contains(&Method::GET, "/files/{other}"));
    }

    #[test]
    fn batch_registration_is_atomic() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/taken", ok)
            .expect("seed");

        let result = tree.register([
            Binding::new(TrustZone::Public, Method::GET, "/fresh", ok),
            Binding::new(TrustZone::Public, Method::GET, "/taken", ok),
        ]);

        assert!(result.is_err());
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains(&Method::GET, "/fresh"));
    }

    #[test]
    fn duplicates_within_a_batch_are_rejected() {
        let mut tree = RouteTree::new();
        let result = tree.register([
            Binding::new(TrustZone::Public, Method::POST, "/x", ok),
            Binding::new(TrustZone::Public, Method::POST, "/x", ok),
        ]);

        assert!(result.is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn zones_are_tied_to_prefixes() {
        let mut tree = RouteTree::new();

        let err = tree
            .route(TrustZone::Privileged, Method::GET, "/api/list", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::ZoneMismatch { .. }
        ));

        let err = tree
            .route(TrustZone::Public, Method::GET, "/api/priv/list", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::ZoneMismatch { .. }
        ));

        let err = tree
            .route(TrustZone::Authenticated, Method::GET, "/api/priv", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::ZoneMismatch { .. }
        ));

        tree.route(TrustZone::Privileged, Method::GET, "/api/priv/list", ok)
            .expect("privileged");
    }

    #[test]
    fn relative_pattern_is_invalid() {
        let mut tree = RouteTree::new();
        let err = tree
            .route(TrustZone::Public, Method::GET, "health", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn unroutable_method_is_rejected() {
        let mut tree = RouteTree::new();
        let method = Method::from_bytes(b"PURGE").expect("method");
        let err = tree
            .route(TrustZone::Public, method, "/cache", ok)
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RouteError::UnsupportedMethod { .. }
        ));
    }

    #[tokio::test]
    async fn static_segments_beat_catch_all() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/{*path}", other)
            .expect("catch-all");
        tree.route(TrustZone::Public, Method::GET, "/ui/{*path}", ok)
            .expect("ui");
        let router = tree.into_router(&open_layers());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/ui/assets/app.js")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn merged_methods_share_a_path() {
        let mut tree = RouteTree::new();
        tree.route(TrustZone::Public, Method::GET, "/{*path}", ok)
            .expect("get");
        tree.route(TrustZone::Authenticated, Method::PUT, "/{*path}", other)
            .expect("put");
        let router = tree.into_router(&open_layers());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/a.png")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/a.png")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
