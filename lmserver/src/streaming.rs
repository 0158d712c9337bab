//! Streaming des artefacts : `GET|HEAD /stream/{id}`
//!
//! Le service valide l'identifiant auprès de la Library Index, attend que
//! le coordinateur rende l'artefact `Ready`, puis lit le fichier en lecture
//! seule depuis la position demandée. Plusieurs clients peuvent lire le
//! même artefact en parallèle : aucun verrou n'est pris après `Ready`.
//!
//! `HEAD` ne fait que consulter le cache : il ne lance jamais de
//! téléchargement.

use crate::range::{ByteRange, RangeRequest, parse_range};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use lmacquire::AcquireError;
use lmcache::{CacheEntry, TrackId};
use lmfetch::FetchError;
use lmlibrary::{Library, LibraryError};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Erreurs visibles par le client d'un stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Identifiant inconnu (ou invalide) : 404, jamais retenté
    #[error("Unknown track: {0}")]
    NotFound(String),

    /// Échec du téléchargement : 502
    #[error("Upstream fetch failed: {error}")]
    Upstream {
        error: FetchError,
        retry_after: Option<Duration>,
    },

    /// Dépassement de délai du téléchargement : 504
    #[error("Upstream fetch timed out: {error}")]
    UpstreamTimeout {
        error: FetchError,
        retry_after: Option<Duration>,
    },

    /// Plage hors du fichier : 416
    #[error("Requested range not satisfiable (size {size})")]
    RangeNotSatisfiable { size: u64 },

    /// Téléchargement annulé avant la fin : 503
    #[error("Fetch cancelled")]
    Cancelled,

    /// Artefact pas encore en cache (réponse à `HEAD`) : 503
    #[error("Track not cached yet: {0}")]
    NotCached(String),

    /// Erreur de stockage : 500
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            StreamError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            StreamError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            StreamError::Cancelled | StreamError::NotCached(_) => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            StreamError::NotFound(_) => "not_found",
            StreamError::Upstream { .. } => "upstream_error",
            StreamError::UpstreamTimeout { .. } => "upstream_timeout",
            StreamError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            StreamError::Cancelled => "cancelled",
            StreamError::NotCached(_) => "not_cached",
            StreamError::Storage(_) => "storage_error",
        }
    }

    fn from_fetch(error: FetchError, retry_after: Option<Duration>) -> Self {
        if error.is_timeout() {
            StreamError::UpstreamTimeout { error, retry_after }
        } else {
            StreamError::Upstream { error, retry_after }
        }
    }
}

impl From<AcquireError> for StreamError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Fetch(error) => StreamError::from_fetch(error, None),
            AcquireError::BackingOff { last, retry_in } => StreamError::from_fetch(last, Some(retry_in)),
            AcquireError::Storage(detail) => StreamError::Storage(detail),
            AcquireError::Cancelled => StreamError::Cancelled,
        }
    }
}

impl From<LibraryError> for StreamError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound(id) => StreamError::NotFound(id.to_string()),
            LibraryError::Acquire(e) => StreamError::from(e),
            other => StreamError::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        let mut response = (status, body).into_response();
        let headers = response.headers_mut();

        match &self {
            StreamError::Upstream {
                retry_after: Some(delay),
                ..
            }
            | StreamError::UpstreamTimeout {
                retry_after: Some(delay),
                ..
            } => {
                let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
            }
            StreamError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }
        response
    }
}

/// Artefact ouvert, positionné au début de la plage demandée
pub struct TrackStream {
    pub entry: CacheEntry,
    /// Taille totale du fichier
    pub size: u64,
    /// Plage servie (`None` : fichier complet)
    pub range: Option<ByteRange>,
    file: File,
}

impl TrackStream {
    /// Nombre d'octets envoyés dans le corps
    pub fn content_length(&self) -> u64 {
        self.range.map(|r| r.length()).unwrap_or(self.size)
    }
}

impl IntoResponse for TrackStream {
    fn into_response(self) -> Response {
        let length = self.content_length();
        let content_type = self
            .entry
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut builder = Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, length)
            .header(header::ACCEPT_RANGES, "bytes");

        builder = match self.range {
            Some(range) => builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, range.content_range(self.size)),
            None => builder.status(StatusCode::OK),
        };

        let body = Body::from_stream(ReaderStream::new(self.file.take(length)));
        builder.body(body).unwrap_or_else(|e| {
            error!("Unable to build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
    }
}

/// Service de streaming
#[derive(Clone)]
pub struct StreamService {
    library: Arc<Library>,
}

impl StreamService {
    pub fn new(library: Arc<Library>) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    /// Prépare le stream d'une piste
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant brut tel que reçu dans l'URL
    /// * `range` - Valeur de l'en-tête `Range`, si présent
    ///
    /// # Returns
    ///
    /// L'artefact ouvert et positionné, ou l'erreur à renvoyer au client.
    /// Un échec n'est jamais mis en cache côté HTTP : la requête suivante
    /// redemande au coordinateur.
    pub async fn handle_request(&self, id: &str, range: Option<&str>) -> Result<TrackStream, StreamError> {
        let id = TrackId::new(id).map_err(|_| StreamError::NotFound(id.to_string()))?;
        let record = self.library.resolve(&id)?;

        // Un artefact évincé entre `Ready` et l'ouverture est redemandé une fois.
        for attempt in 0..2 {
            let entry = self
                .library
                .coordinator()
                .ensure_cached_from(&id, record.reference())
                .await?;
            let Some(path) = entry.path.clone() else {
                return Err(StreamError::Storage(format!("ready entry {} has no file", id)));
            };

            match File::open(&path).await {
                Ok(file) => {
                    let stream = self.open_range(&id, entry, file, range).await?;
                    if let Err(e) = self.library.coordinator().store().touch(&id).await {
                        warn!(track = %id, "Unable to record stream hit: {}", e);
                    }
                    match stream.range {
                        Some(r) => info!(
                            track = %id,
                            start = r.start,
                            end = r.end,
                            size = stream.size,
                            "Streaming range"
                        ),
                        None => info!(track = %id, size = stream.size, "Streaming track"),
                    }
                    return Ok(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt == 0 => {
                    warn!(track = %id, "Artifact vanished before streaming, fetching again");
                }
                Err(e) => {
                    error!(track = %id, "Unable to open {}: {}", path.display(), e);
                    return Err(StreamError::Storage(format!("unable to open artifact: {}", e)));
                }
            }
        }

        Err(StreamError::Storage(format!("artifact for {} keeps disappearing", id)))
    }

    /// Prépare la réponse à `HEAD` depuis le cache seul
    ///
    /// Une piste connue mais absente du cache donne [`StreamError::NotCached`],
    /// ou l'erreur du dernier échec pendant la fenêtre d'attente.
    pub async fn handle_head(&self, id: &str, range: Option<&str>) -> Result<TrackStream, StreamError> {
        let id = TrackId::new(id).map_err(|_| StreamError::NotFound(id.to_string()))?;
        self.library.resolve(&id)?;
        let coordinator = self.library.coordinator();

        let not_cached = || match coordinator.backoff(&id) {
            Some(backoff) => StreamError::from(backoff),
            None => StreamError::NotCached(id.to_string()),
        };

        let Some(entry) = coordinator.cached(&id).await? else {
            return Err(not_cached());
        };
        let Some(path) = entry.path.clone() else {
            return Err(not_cached());
        };
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_cached()),
            Err(e) => return Err(StreamError::Storage(format!("unable to open artifact: {}", e))),
        };

        debug!(track = %id, "Answering HEAD from cache");
        self.open_range(&id, entry, file, range).await
    }

    async fn open_range(
        &self,
        id: &TrackId,
        entry: CacheEntry,
        mut file: File,
        range: Option<&str>,
    ) -> Result<TrackStream, StreamError> {
        let size = file
            .metadata()
            .await
            .map_err(|e| StreamError::Storage(e.to_string()))?
            .len();

        let range = match parse_range(range, size) {
            RangeRequest::Full => None,
            RangeRequest::Partial(range) => Some(range),
            RangeRequest::Unsatisfiable => {
                debug!(track = %id, size, "Unsatisfiable range");
                return Err(StreamError::RangeNotSatisfiable { size });
            }
        };

        if let Some(range) = range {
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| StreamError::Storage(e.to_string()))?;
        }

        Ok(TrackStream {
            entry,
            size,
            range,
            file,
        })
    }
}

fn respond(id: &str, result: Result<TrackStream, StreamError>) -> Response {
    match result {
        Ok(stream) => stream.into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                warn!(track = %id, "Stream refused: {}", e);
            }
            e.into_response()
        }
    }
}

async fn stream_track(
    State(service): State<StreamService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    respond(&id, service.handle_request(&id, range).await)
}

async fn head_track(
    State(service): State<StreamService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    respond(&id, service.handle_head(&id, range).await)
}

/// Router de streaming (le corps des réponses à `HEAD` est retiré par axum)
pub fn create_stream_router(service: StreamService) -> Router {
    Router::new()
        .route("/stream/{id}", get(stream_track).head(head_track))
        .with_state(service)
}
