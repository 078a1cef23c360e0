//! Storage collaborator.
//!
//! The server only knows the `Content` trait. `FsContent` is the bundled
//! implementation: files live under `root_dir`, the UI under `ui_dir`.
//! Paths are resolved component by component and anything that could leave
//! the root (`..`, absolute or prefixed components) is refused with a 400.

use axum::Json;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

/// Largest body accepted by `put` and `upload`.
pub const MAX_PUT_BYTES: usize = 64 * 1024 * 1024;

/// Storage and UI handlers.
#[async_trait::async_trait]
pub trait Content: Send + Sync + 'static {
    /// Serves a stored file.
    async fn get(&self, request: Request) -> Response;
    /// Stores the request body at the request path.
    async fn put(&self, request: Request) -> Response;
    /// Lists a directory (`?path=`).
    async fn list(&self, request: Request) -> Response;
    /// Moves a file (JSON `{"from", "to"}`).
    async fn rename(&self, request: Request) -> Response;
    /// Stores multipart file fields in a directory (`?path=`).
    async fn upload(&self, request: Request) -> Response;
    /// Serves the web UI.
    async fn ui(&self, request: Request) -> Response;
    /// True when storage is usable.
    async fn ready(&self) -> bool;
}

/// Storage errors, rendered as plain-text responses.
#[derive(Debug)]
pub enum ContentError {
    /// The path would leave the storage root.
    InvalidPath { path: String },
    NotFound { path: String },
    /// The request body or query could not be used.
    BadRequest { details: String },
    /// Filesystem failure.
    Io { path: String, details: String },
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath { path } => write!(f, "invalid path '{path}'"),
            Self::NotFound { path } => write!(f, "'{path}' not found"),
            Self::BadRequest { details } => write!(f, "bad request: {details}"),
            Self::Io { path, details } => write!(f, "I/O error on '{path}': {details}"),
        }
    }
}

impl std::error::Error for ContentError {}

impl IntoResponse for ContentError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidPath { .. } | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Io { .. } => {
                tracing::error!(error = %self, "content I/O failure");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    .into_response();
            }
        };
        (status, format!("Error: {self}")).into_response()
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ContentError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ContentError::NotFound {
            path: path.display().to_string(),
        }
    } else {
        ContentError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        }
    }
}

/// `?path=` for list and upload.
#[derive(Debug, Default, Deserialize)]
struct PathQuery {
    path: Option<String>,
}

/// Body of the move endpoint.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
}

/// One directory entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Response of the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<Entry>,
}

/// Filesystem-backed content.
#[derive(Debug, Clone)]
pub struct FsContent {
    root: PathBuf,
    ui: PathBuf,
}

impl FsContent {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ui: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ui: ui.into(),
        }
    }

    /// Maps a request path onto the storage root.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for any component other than a plain name.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ContentError> {
        let mut resolved = self.root.clone();
        for component in Path::new(raw.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ContentError::InvalidPath {
                        path: raw.to_string(),
                    });
                }
            }
        }
        Ok(resolved)
    }

    /// Like [`FsContent::resolve`], for a still percent-encoded request path.
    ///
    /// # Errors
    ///
    /// `InvalidPath` if the path is not UTF-8 once decoded or escapes the root.
    pub fn resolve_encoded(&self, encoded: &str) -> Result<PathBuf, ContentError> {
        let decoded = urlencoding::decode(encoded).map_err(|_| ContentError::InvalidPath {
            path: encoded.to_string(),
        })?;
        self.resolve(&decoded)
    }

    async fn store(&self, target: &Path, bytes: &[u8]) -> Result<(), ContentError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }
        tokio::fs::write(target, bytes)
            .await
            .map_err(|e| io_error(target, &e))
    }

    async fn try_put(&self, request: Request) -> Result<Response, ContentError> {
        let path = request.uri().path().to_string();
        let target = self.resolve_encoded(&path)?;
        if target == self.root {
            return Err(ContentError::InvalidPath { path });
        }
        let bytes = axum::body::to_bytes(request.into_body(), MAX_PUT_BYTES)
            .await
            .map_err(|e| ContentError::BadRequest {
                details: e.to_string(),
            })?;
        self.store(&target, &bytes).await?;
        tracing::info!(path = %path, bytes = bytes.len(), "stored file");
        Ok(StatusCode::CREATED.into_response())
    }

    async fn try_list(&self, request: Request) -> Result<Response, ContentError> {
        let query = Query::<PathQuery>::try_from_uri(request.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();
        let path = query.path.unwrap_or_else(|| "/".to_string());
        let dir = self.resolve(&path)?;

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, &e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(&dir, &e))? {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| io_error(&entry.path(), &e))?;
            entries.push(Entry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Json(Listing { path, entries }).into_response())
    }

    async fn try_rename(&self, request: Request) -> Result<Response, ContentError> {
        let Json(body) = Json::<MoveRequest>::from_request(request, &())
            .await
            .map_err(|e| ContentError::BadRequest {
                details: e.body_text(),
            })?;
        let from = self.resolve(&body.from)?;
        let to = self.resolve(&body.to)?;
        if from == self.root || to == self.root {
            return Err(ContentError::InvalidPath {
                path: body.from.clone(),
            });
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(&from, &e))?;
        tracing::info!(from = %body.from, to = %body.to, "moved file");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn try_upload(&self, request: Request) -> Result<Response, ContentError> {
        let query = Query::<PathQuery>::try_from_uri(request.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();
        let dir_path = query.path.unwrap_or_else(|| "/".to_string());
        let dir = self.resolve(&dir_path)?;

        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ContentError::BadRequest {
                details: e.body_text(),
            })?;

        let mut stored = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ContentError::BadRequest {
                details: e.body_text(),
            })?
        {
            let Some(name) = field
                .file_name()
                .and_then(|n| Path::new(n).file_name())
                .map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let bytes = field.bytes().await.map_err(|e| ContentError::BadRequest {
                details: e.body_text(),
            })?;
            let target = dir.join(&name);
            self.store(&target, &bytes).await?;
            stored.push(format!("{}/{}", dir_path.trim_end_matches('/'), name));
        }

        if stored.is_empty() {
            return Err(ContentError::BadRequest {
                details: "no file fields in upload".to_string(),
            });
        }
        tracing::info!(count = stored.len(), dir = %dir_path, "uploaded files");
        Ok((StatusCode::CREATED, Json(stored)).into_response())
    }
}

fn unwrap_response(result: Result<Response, ContentError>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn serve<S>(service: S, request: Request) -> Response
where
    S: tower::Service<Request, Error = std::convert::Infallible> + Send,
    S::Response: IntoResponse,
    S::Future: Send,
{
    match service.oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

#[async_trait::async_trait]
impl Content for FsContent {
    async fn get(&self, request: Request) -> Response {
        if let Err(e) = self.resolve_encoded(request.uri().path()) {
            return e.into_response();
        }
        serve(ServeDir::new(&self.root), request).await
    }

    async fn put(&self, request: Request) -> Response {
        unwrap_response(self.try_put(request).await)
    }

    async fn list(&self, request: Request) -> Response {
        unwrap_response(self.try_list(request).await)
    }

    async fn rename(&self, request: Request) -> Response {
        unwrap_response(self.try_rename(request).await)
    }

    async fn upload(&self, request: Request) -> Response {
        unwrap_response(self.try_upload(request).await)
    }

    async fn ui(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();
        let stripped = parts.uri.path().strip_prefix("/ui").unwrap_or_default();
        let path = if stripped.is_empty() { "/" } else { stripped };
        let target = match parts.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
        parts.uri = match target.parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                return ContentError::BadRequest {
                    details: e.to_string(),
                }
                .into_response();
            }
        };
        let index = ServeFile::new(self.ui.join("index.html"));
        serve(
            ServeDir::new(&self.ui).fallback(index),
            Request::from_parts(parts, body),
        )
        .await
    }

    async fn ready(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}
