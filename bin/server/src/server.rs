//! Server assembly and lifecycle.
//!
//! `ServerBuilder::build` resolves every setting into immutable parts (keys,
//! auth driver, metrics driver, route tree) and composes them into a single
//! `axum::Router`. `Server::run` binds the listener and serves until Ctrl-C.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::response::{IntoResponse, Redirect, Response};
use imagik_core::Result;
use rootcause::Report;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::{self, AuthDriver, AuthDriverKind, IdentityProvider};
use crate::config::ServerConfig;
use crate::content::{Content, FsContent, MAX_PUT_BYTES};
use crate::csrf::CsrfGuard;
use crate::error::ServerError;
use crate::health::{LIVENESS_PATH, READINESS_PATH, liveness, readiness};
use crate::metrics::{self, MetricsDriver, MetricsDriverKind};
use crate::middleware::{MiddlewareChain, ZoneLayers};
use crate::router::{Binding, RouteError, RouteTree, TrustZone};
use crate::session::{SessionStore, derive_key};

/// Where `/` sends browsers outside debug mode.
pub const UI_HOME: &str = "/ui/";

/// State shared by the content routes.
#[derive(Clone)]
struct ContentState {
    content: Arc<dyn Content>,
    metrics: Arc<dyn MetricsDriver>,
}

async fn serve_content(State(state): State<ContentState>, request: Request) -> Response {
    let response = state.content.get(request).await;
    state.metrics.record_serve(response.status());
    response
}

async fn store_content(State(state): State<ContentState>, request: Request) -> Response {
    state.content.put(request).await
}

async fn list_content(State(state): State<ContentState>, request: Request) -> Response {
    state.content.list(request).await
}

async fn move_content(State(state): State<ContentState>, request: Request) -> Response {
    state.content.rename(request).await
}

async fn upload_content(State(state): State<ContentState>, request: Request) -> Response {
    state.content.upload(request).await
}

async fn show_ui(State(state): State<ContentState>, request: Request) -> Response {
    state.content.ui(request).await
}

async fn ui_home() -> Response {
    Redirect::to(UI_HOME).into_response()
}

fn routes_error(e: &Report<RouteError>) -> ServerError {
    ServerError::Routes {
        details: e.current_context().to_string(),
    }
}

/// Content, UI and health bindings.
fn content_bindings(state: &ContentState, debug: bool) -> Vec<Binding> {
    let home = if debug {
        Binding::with_state(
            TrustZone::Public,
            Method::GET,
            "/",
            serve_content,
            state.clone(),
        )
    } else {
        Binding::new(TrustZone::Public, Method::GET, "/", ui_home)
    };

    let mut bindings = vec![
        Binding::new(TrustZone::Public, Method::GET, LIVENESS_PATH, liveness),
        Binding::with_state(
            TrustZone::Public,
            Method::GET,
            READINESS_PATH,
            readiness,
            Arc::clone(&state.content),
        ),
        home,
    ];
    for pattern in ["/ui", "/ui/", "/ui/{*path}"] {
        bindings.push(Binding::with_state(
            TrustZone::Public,
            Method::GET,
            pattern,
            show_ui,
            state.clone(),
        ));
    }
    bindings.extend([
        Binding::with_state(
            TrustZone::Public,
            Method::GET,
            "/{*path}",
            serve_content,
            state.clone(),
        ),
        Binding::with_state(
            TrustZone::Authenticated,
            Method::PUT,
            "/{*path}",
            store_content,
            state.clone(),
        ),
        Binding::with_state(
            TrustZone::Privileged,
            Method::GET,
            "/api/priv/list",
            list_content,
            state.clone(),
        ),
        Binding::with_state(
            TrustZone::Privileged,
            Method::POST,
            "/api/priv/move",
            move_content,
            state.clone(),
        ),
        Binding::with_state(
            TrustZone::Privileged,
            Method::POST,
            "/api/priv/upload",
            upload_content,
            state.clone(),
        )
        .with_body_limit(MAX_PUT_BYTES),
    ]);
    bindings
}

/// Collects optional collaborators before building a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    content: Option<Arc<dyn Content>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl ServerBuilder {
    /// Replaces the filesystem content collaborator.
    #[must_use]
    pub fn content(mut self, content: Arc<dyn Content>) -> Self {
        self.content = Some(content);
        self
    }

    /// Replaces OIDC discovery with a ready provider.
    #[must_use]
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Resolves the configuration and composes the router.
    ///
    /// # Errors
    ///
    /// Any `ServerError`: bad keys, an unknown driver, a failed driver init or
    /// a route tree violation. Nothing is bound yet when this fails.
    pub async fn build(self) -> Result<Server, ServerError> {
        let config = self.config;

        config
            .session
            .validate()
            .map_err(|details| ServerError::Config { details })?;
        let key = derive_key("secret_key", config.secret_key.as_bytes())?;
        let sessions = SessionStore::new(key, &config.session);

        let csrf = config
            .csrf_key
            .as_deref()
            .map(|encoded| CsrfGuard::from_base64(encoded, config.session.secure_cookies))
            .transpose()?;

        let kind: AuthDriverKind = config.auth_driver.parse()?;
        let mut driver =
            auth::from_config(kind, &config, sessions.clone(), self.identity_provider)?;
        driver.init().await?;

        let mut routes = RouteTree::new();
        driver
            .init_routes(&mut routes)
            .map_err(|e| routes_error(&e))?;

        let metrics_kind: MetricsDriverKind = config.metrics_driver.parse()?;
        let metrics = metrics::from_kind(metrics_kind);
        metrics
            .init_routes(&mut routes)
            .map_err(|e| routes_error(&e))?;

        let content: Arc<dyn Content> = match self.content {
            Some(content) => content,
            None => Arc::new(FsContent::new(&config.root_dir, &config.ui_dir)),
        };
        let state = ContentState {
            content,
            metrics: Arc::clone(&metrics),
        };
        routes
            .register(content_bindings(&state, config.debug))
            .map_err(|e| routes_error(&e))?;

        let driver: Arc<dyn AuthDriver> = Arc::from(driver);
        let layers = ZoneLayers::new(Arc::clone(&driver), csrf);
        let route_count = routes.len();
        let router = MiddlewareChain::standard().apply(routes.into_router(&layers));

        tracing::info!(
            auth_driver = %kind,
            metrics_driver = %metrics_kind,
            routes = route_count,
            csrf = layers.stages(TrustZone::Privileged).len() > 1,
            "server assembled"
        );

        Ok(Server {
            router,
            listen: config.listen,
            driver,
            sessions,
            metrics,
        })
    }
}

/// An assembled server, ready to bind.
pub struct Server {
    router: Router,
    listen: String,
    driver: Arc<dyn AuthDriver>,
    sessions: SessionStore,
    metrics: Arc<dyn MetricsDriver>,
}

impl Server {
    #[must_use]
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            content: None,
            identity_provider: None,
        }
    }

    /// Builds a server with the default collaborators.
    ///
    /// # Errors
    ///
    /// See [`ServerBuilder::build`].
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        Self::builder(config).build().await
    }

    /// The composed router, with every middleware stage applied.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[must_use]
    pub fn auth_kind(&self) -> AuthDriverKind {
        self.driver.kind()
    }

    #[must_use]
    pub fn metrics_kind(&self) -> MetricsDriverKind {
        self.metrics.kind()
    }

    /// The session store every driver issues cookies through.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Binds `listen` and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if the address cannot be bound, `ServerError::Serve`
    /// if the accept loop fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(&self.listen)
            .await
            .map_err(|e| ServerError::Bind {
                address: self.listen.clone(),
                details: e.to_string(),
            })?;
        let address = listener
            .local_addr()
            .map_or_else(|_| self.listen.clone(), |a| a.to_string());
        tracing::info!(auth_driver = %self.driver.kind(), "listening on http://{}", address);

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Serve {
            details: e.to_string(),
        })?;

        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => tracing::warn!(error = %e, "could not listen for Ctrl-C"),
    }
}
