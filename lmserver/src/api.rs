//! API REST de LanMusic (`/api/lanmusic/...`)
//!
//! Catalogue et état des pistes, pilotage du cache, historique d'écoute et
//! session de lecture.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use lmacquire::{AcquireError, TrackStatus};
use lmcache::{CacheEntry, CacheStats, ConsolidateReport, StorageError, TrackId};
use lmfetch::FetchError;
use lmlibrary::{History, Library, LibraryError, LibraryRecord, PlaylistSession, SessionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::{IntoParams, OpenApi, ToSchema};

/// État partagé des handlers
#[derive(Clone)]
pub struct ApiState {
    pub library: Arc<Library>,
    pub history: Arc<History>,
    pub sessions: Arc<SessionStore>,
}

/// Une piste du catalogue avec l'état de son artefact
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackView {
    #[serde(flatten)]
    pub record: LibraryRecord,
    pub status: TrackStatus,
}

/// Filtre de la liste des pistes
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TrackQuery {
    /// Mots à chercher dans le titre, les artistes et l'album
    pub q: Option<String>,
}

/// Pistes d'un même artiste
#[derive(Debug, Serialize, ToSchema)]
pub struct ArtistGroup {
    pub artist: String,
    pub tracks: Vec<TrackView>,
}

/// Détail d'une piste
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackDetail {
    #[serde(flatten)]
    pub record: LibraryRecord,
    pub status: TrackStatus,
    /// Entrée du cache, si une existe
    pub cache: Option<CacheEntry>,
    /// Dernier échec de téléchargement connu
    pub last_failure: Option<FetchError>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub id: TrackId,
    pub status: TrackStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EvictResponse {
    pub id: TrackId,
    pub evicted: bool,
}

/// Téléchargement en cours
#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadView {
    pub id: TrackId,
    pub status: TrackStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HistoryRequest {
    /// Identifiant de la piste écoutée
    pub id: TrackId,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Erreur d'un handler de l'API
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound(id) => ApiError::NotFound(format!("Unknown track: {}", id)),
            LibraryError::Acquire(e) => ApiError::from(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AcquireError> for ApiError {
    fn from(err: AcquireError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", m),
        };
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

fn parse_id(raw: &str) -> Result<TrackId, ApiError> {
    TrackId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn track_views(library: &Library, records: Vec<LibraryRecord>) -> Result<Vec<TrackView>, ApiError> {
    Ok(library
        .with_status(records)
        .await?
        .into_iter()
        .map(|(record, status)| TrackView { record, status })
        .collect())
}

/// Liste le catalogue avec l'état de chaque piste
///
/// Avec `q`, seules les pistes dont le titre, un artiste ou l'album
/// contient chacun des mots sont retournées.
#[utoipa::path(
    get,
    path = "/api/lanmusic/tracks",
    params(TrackQuery),
    responses(
        (status = 200, description = "Known tracks", body = Vec<TrackView>)
    ),
    tag = "library"
)]
pub async fn list_tracks(
    State(state): State<ApiState>,
    Query(query): Query<TrackQuery>,
) -> Result<Json<Vec<TrackView>>, ApiError> {
    let records = match query.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => {
            debug!(query = q, "Searching library");
            state.library.search(q)
        }
        _ => state.library.list(),
    };
    Ok(Json(track_views(&state.library, records).await?))
}

/// Catalogue regroupé par artiste principal
#[utoipa::path(
    get,
    path = "/api/lanmusic/artists",
    responses(
        (status = 200, description = "Tracks grouped by artist", body = Vec<ArtistGroup>)
    ),
    tag = "library"
)]
pub async fn list_artists(State(state): State<ApiState>) -> Result<Json<Vec<ArtistGroup>>, ApiError> {
    let mut groups = Vec::new();
    for (artist, records) in state.library.group_by_artist() {
        groups.push(ArtistGroup {
            artist,
            tracks: track_views(&state.library, records).await?,
        });
    }
    Ok(Json(groups))
}

/// Détail d'une piste
#[utoipa::path(
    get,
    path = "/api/lanmusic/tracks/{id}",
    params(("id" = String, Path, description = "Track identifier")),
    responses(
        (status = 200, description = "Track detail", body = TrackDetail),
        (status = 404, description = "Unknown track", body = ErrorResponse)
    ),
    tag = "library"
)]
pub async fn get_track(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TrackDetail>, ApiError> {
    let id = parse_id(&id)?;
    let record = state.library.resolve(&id)?;
    let status = state.library.status(&id).await?;
    let coordinator = state.library.coordinator();
    let cache = coordinator.store().lookup(&id).await?;

    Ok(Json(TrackDetail {
        record,
        status,
        cache,
        last_failure: coordinator.last_failure(&id),
    }))
}

/// État de l'artefact d'une piste
#[utoipa::path(
    get,
    path = "/api/lanmusic/tracks/{id}/status",
    params(("id" = String, Path, description = "Track identifier")),
    responses(
        (status = 200, description = "Track status", body = StatusResponse),
        (status = 404, description = "Unknown track", body = ErrorResponse)
    ),
    tag = "library"
)]
pub async fn get_track_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_id(&id)?;
    let status = state.library.status(&id).await?;
    Ok(Json(StatusResponse { id, status }))
}

/// Lance le téléchargement d'une piste sans attendre
///
/// Pendant la fenêtre d'attente après un échec, l'état retourné est `failed`.
#[utoipa::path(
    post,
    path = "/api/lanmusic/tracks/{id}/prefetch",
    params(("id" = String, Path, description = "Track identifier")),
    responses(
        (status = 202, description = "Fetch queued or already done", body = StatusResponse),
        (status = 404, description = "Unknown track", body = ErrorResponse)
    ),
    tag = "cache"
)]
pub async fn prefetch_track(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let id = parse_id(&id)?;
    let status = match state.library.prefetch(&id).await {
        Ok(status) => status,
        Err(LibraryError::Acquire(AcquireError::BackingOff { .. })) => TrackStatus::Failed,
        Err(e) => return Err(e.into()),
    };
    debug!(track = %id, ?status, "Prefetch requested");
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { id, status })))
}

/// Évince l'artefact d'une piste et oublie son dernier échec
#[utoipa::path(
    delete,
    path = "/api/lanmusic/tracks/{id}/cache",
    params(("id" = String, Path, description = "Track identifier")),
    responses(
        (status = 200, description = "Eviction done", body = EvictResponse)
    ),
    tag = "cache"
)]
pub async fn evict_track(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<EvictResponse>, ApiError> {
    let id = parse_id(&id)?;
    let evicted = state.library.coordinator().evict(&id).await?;
    info!(track = %id, evicted, "Eviction requested");
    Ok(Json(EvictResponse { id, evicted }))
}

/// Téléchargements en cours
#[utoipa::path(
    get,
    path = "/api/lanmusic/downloads",
    responses(
        (status = 200, description = "In-flight fetches", body = Vec<DownloadView>)
    ),
    tag = "cache"
)]
pub async fn list_downloads(State(state): State<ApiState>) -> Json<Vec<DownloadView>> {
    let downloads = state
        .library
        .coordinator()
        .in_flight()
        .into_iter()
        .map(|(id, status)| DownloadView { id, status })
        .collect();
    Json(downloads)
}

/// Statistiques du cache
#[utoipa::path(
    get,
    path = "/api/lanmusic/cache/stats",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStats)
    ),
    tag = "cache"
)]
pub async fn cache_stats(State(state): State<ApiState>) -> Result<Json<CacheStats>, ApiError> {
    Ok(Json(state.library.coordinator().store().stats()?))
}

/// Réconcilie la base et les fichiers du cache
#[utoipa::path(
    post,
    path = "/api/lanmusic/cache/consolidate",
    responses(
        (status = 200, description = "Consolidation report", body = ConsolidateReport)
    ),
    tag = "cache"
)]
pub async fn consolidate_cache(State(state): State<ApiState>) -> Result<Json<ConsolidateReport>, ApiError> {
    Ok(Json(state.library.coordinator().store().consolidate().await?))
}

/// Pistes récemment écoutées, la plus récente en tête
#[utoipa::path(
    get,
    path = "/api/lanmusic/history",
    responses(
        (status = 200, description = "Recently played tracks", body = Vec<LibraryRecord>)
    ),
    tag = "player"
)]
pub async fn get_history(State(state): State<ApiState>) -> Json<Vec<LibraryRecord>> {
    Json(state.history.list())
}

/// Ajoute une piste en tête de l'historique
#[utoipa::path(
    post,
    path = "/api/lanmusic/history",
    request_body = HistoryRequest,
    responses(
        (status = 200, description = "Updated history", body = Vec<LibraryRecord>),
        (status = 404, description = "Unknown track", body = ErrorResponse)
    ),
    tag = "player"
)]
pub async fn add_history(
    State(state): State<ApiState>,
    Json(request): Json<HistoryRequest>,
) -> Result<Json<Vec<LibraryRecord>>, ApiError> {
    let record = state.library.resolve(&request.id)?;
    debug!(track = %request.id, "Adding to history");
    Ok(Json(state.history.push(record)))
}

/// Sauvegarde la session de lecture
#[utoipa::path(
    post,
    path = "/api/lanmusic/session",
    request_body = PlaylistSession,
    responses(
        (status = 204, description = "Session saved")
    ),
    tag = "player"
)]
pub async fn save_session(
    State(state): State<ApiState>,
    Json(session): Json<PlaylistSession>,
) -> StatusCode {
    debug!(tracks = session.queue.len(), "Saving playlist session");
    state.sessions.save(session);
    StatusCode::NO_CONTENT
}

/// Session de lecture sauvegardée
#[utoipa::path(
    get,
    path = "/api/lanmusic/session",
    responses(
        (status = 200, description = "Saved session", body = PlaylistSession),
        (status = 404, description = "No session stored", body = ErrorResponse)
    ),
    tag = "player"
)]
pub async fn load_session(State(state): State<ApiState>) -> Result<Json<PlaylistSession>, ApiError> {
    state
        .sessions
        .load()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No session stored".to_string()))
}

/// Oublie la session de lecture
#[utoipa::path(
    delete,
    path = "/api/lanmusic/session",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "player"
)]
pub async fn clear_session(State(state): State<ApiState>) -> StatusCode {
    state.sessions.clear();
    StatusCode::NO_CONTENT
}

/// Crée le router de l'API LanMusic (monté sous `/api/lanmusic`)
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/tracks", get(list_tracks))
        .route("/artists", get(list_artists))
        .route("/tracks/{id}", get(get_track))
        .route("/tracks/{id}/status", get(get_track_status))
        .route("/tracks/{id}/prefetch", post(prefetch_track))
        .route("/tracks/{id}/cache", delete(evict_track))
        .route("/downloads", get(list_downloads))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/consolidate", post(consolidate_cache))
        .route("/history", get(get_history).post(add_history))
        .route(
            "/session",
            get(load_session).post(save_session).delete(clear_session),
        )
        .with_state(state)
}

/// Documentation OpenAPI de l'API LanMusic
#[derive(OpenApi)]
#[openapi(
    paths(
        list_tracks,
        list_artists,
        get_track,
        get_track_status,
        prefetch_track,
        evict_track,
        list_downloads,
        cache_stats,
        consolidate_cache,
        get_history,
        add_history,
        save_session,
        load_session,
        clear_session,
    ),
    components(schemas(
        TrackView,
        ArtistGroup,
        TrackDetail,
        StatusResponse,
        EvictResponse,
        DownloadView,
        HistoryRequest,
        ErrorResponse,
        LibraryRecord,
        PlaylistSession,
        TrackStatus,
        CacheEntry,
        CacheStats,
        ConsolidateReport,
        FetchError,
    )),
    tags(
        (name = "library", description = "Track catalog and status"),
        (name = "cache", description = "Audio cache management"),
        (name = "player", description = "Listening history and playback session")
    )
)]
pub struct LanMusicApiDoc;
