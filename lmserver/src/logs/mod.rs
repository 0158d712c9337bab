//! Journalisation : buffer circulaire, diffusion SSE et niveau réglable à chaud
//!
//! Chaque événement `tracing` devient un [`LogEntry`] numéroté, avec ses
//! champs structurés à part (`track`, `reference`...). Les clients peuvent
//! ainsi suivre une seule piste (`/log-sse?track=abc`) et reprendre un flux
//! interrompu grâce à `Last-Event-ID`.

mod sselayer;

pub use sselayer::SseLayer;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use lmconfig::Config;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::{Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};

const LIVE_CHANNEL_CAPACITY: usize = 1024;
const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

/// Une ligne de journal
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogEntry {
    /// Numéro croissant, utilisé comme identifiant d'événement SSE
    pub seq: u64,
    /// Millisecondes depuis l'epoch Unix
    pub timestamp_ms: u64,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Champs structurés de l'événement
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    fn severity(&self) -> Option<Level> {
        parse_level(&self.level)
    }
}

struct Ring {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

/// État partagé du journal : historique borné, diffusion en direct, niveau courant
#[derive(Clone)]
pub struct LogState {
    ring: Arc<Mutex<Ring>>,
    next_seq: Arc<AtomicU64>,
    live: broadcast::Sender<LogEntry>,
    level: Arc<Mutex<Level>>,
    reload: Option<Arc<reload::Handle<LevelFilter, Registry>>>,
}

impl LogState {
    /// État sans subscriber global (tests, outils)
    pub fn detached(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(Ring {
                capacity,
                entries: VecDeque::with_capacity(capacity),
            })),
            next_seq: Arc::new(AtomicU64::new(1)),
            live: broadcast::channel(LIVE_CHANNEL_CAPACITY).0,
            level: Arc::new(Mutex::new(Level::TRACE)),
            reload: None,
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Niveau le plus verbeux actuellement enregistré
    pub fn level(&self) -> Level {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change le niveau du filtre global
    pub fn set_level(&self, level: Level) {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = level;
        if let Some(handle) = &self.reload {
            if let Err(e) = handle.reload(LevelFilter::from_level(level)) {
                eprintln!("Unable to reload log filter: {}", e);
            }
        }
    }

    pub(crate) fn record(
        &self,
        level: &Level,
        target: &str,
        message: String,
        fields: BTreeMap<String, String>,
    ) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let entry = LogEntry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            timestamp_ms,
            level: level.as_str().to_string(),
            target: target.to_string(),
            message,
            fields,
        };

        {
            let mut ring = self.ring();
            if ring.entries.len() >= ring.capacity {
                ring.entries.pop_front();
            }
            ring.entries.push_back(entry.clone());
        }
        let _ = self.live.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    /// Entrées conservées qui passent `filter`, de la plus ancienne à la plus récente
    pub fn snapshot(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.ring()
            .entries
            .iter()
            .filter(|e| filter.accepts(e))
            .cloned()
            .collect()
    }
}

/// Paramètres de filtrage de `/log-sse` et `/log-dump`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    /// Sévérité minimale (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: Option<String>,
    /// Préfixe de la cible (ex: `lmacquire`)
    pub target: Option<String>,
    /// Valeur du champ `track`
    pub track: Option<String>,
    /// Sous-chaîne du message
    pub search: Option<String>,
    /// Ignore les entrées de numéro inférieur ou égal
    pub after: Option<u64>,
}

impl LogFilter {
    pub fn accepts(&self, entry: &LogEntry) -> bool {
        if self.after.is_some_and(|after| entry.seq <= after) {
            return false;
        }
        if let Some(min) = self.level.as_deref().and_then(parse_level) {
            // ERROR < WARN < ... < TRACE pour `tracing::Level`
            if entry.severity().is_none_or(|level| level > min) {
                return false;
            }
        }
        if let Some(prefix) = &self.target {
            if !entry.target.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(track) = &self.track {
            if entry.fields.get("track") != Some(track) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !entry.message.contains(search.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Flux SSE : l'historique filtré, puis les nouvelles entrées
///
/// Un client qui se reconnecte avec `Last-Event-ID` ne reçoit que la suite.
pub async fn log_sse(
    State(state): State<LogState>,
    Query(mut filter): Query<LogFilter>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(last) = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        filter.after = Some(filter.after.map_or(last, |a| a.max(last)));
    }

    let mut live = state.subscribe();
    let history = state.snapshot(&filter);

    let stream = async_stream::stream! {
        let mut last_seq = filter.after.unwrap_or(0);
        for entry in history {
            last_seq = entry.seq;
            if let Some(event) = to_event(&entry) {
                yield Ok::<_, axum::Error>(event);
            }
        }

        loop {
            let entry = match live.recv().await {
                Ok(entry) => entry,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            // Déjà envoyée avec l'historique
            if entry.seq <= last_seq || !filter.accepts(&entry) {
                continue;
            }
            last_seq = entry.seq;
            if let Some(event) = to_event(&entry) {
                yield Ok::<_, axum::Error>(event);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_event(entry: &LogEntry) -> Option<Event> {
    let data = serde_json::to_string(entry).ok()?;
    Some(
        Event::default()
            .id(entry.seq.to_string())
            .event(entry.level.to_lowercase())
            .data(data),
    )
}

/// Contenu du buffer, au format JSON
pub async fn log_dump(State(state): State<LogState>, Query(filter): Query<LogFilter>) -> Json<Vec<LogEntry>> {
    Json(state.snapshot(&filter))
}

/// Options d'initialisation du logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Nombre d'entrées conservées pour `/log-dump` et la reprise SSE
    pub buffer_capacity: usize,
    /// Sortie console en plus du buffer
    pub enable_console: bool,
    pub min_level: Level,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            enable_console: true,
            min_level: Level::INFO,
        }
    }
}

impl LoggingOptions {
    /// Lit `host.logger.*`
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_capacity: config.get_log_cache_size(),
            enable_console: config.get_log_enable_console(),
            min_level: parse_level(&config.get_log_min_level()).unwrap_or(Level::INFO),
        }
    }
}

/// Installe le subscriber global (filtre rechargeable, buffer SSE, console)
///
/// Si un subscriber global existe déjà, le `LogState` retourné reste
/// utilisable mais ne reçoit rien.
pub fn init_logging(options: LoggingOptions) -> LogState {
    let (filter, handle) = reload::Layer::new(LevelFilter::from_level(options.min_level));

    let mut state = LogState::detached(options.buffer_capacity);
    state.reload = Some(Arc::new(handle));
    *state.level.lock().unwrap_or_else(PoisonError::into_inner) = options.min_level;

    let console = options
        .enable_console
        .then(|| tracing_subscriber::fmt::layer().with_target(true));
    let installed = Registry::default()
        .with(filter)
        .with(SseLayer::new(state.clone()))
        .with(console)
        .try_init();

    if let Err(e) = installed {
        eprintln!("Logging already initialized: {}", e);
    }
    state
}

/// Changement de niveau
#[derive(Debug, Deserialize, ToSchema)]
pub struct LogSetupRequest {
    #[schema(example = "debug")]
    pub level: String,
}

/// Niveau courant et valeurs acceptées
#[derive(Debug, Serialize, ToSchema)]
pub struct LogSetupResponse {
    pub level: String,
    pub levels: Vec<String>,
}

impl LogSetupResponse {
    fn new(level: Level) -> Self {
        Self {
            level: level.as_str().to_string(),
            levels: LEVELS.iter().map(|l| l.as_str().to_string()).collect(),
        }
    }
}

/// Niveau de journalisation courant
#[utoipa::path(
    get,
    path = "/api/logs/log_setup",
    responses(
        (status = 200, description = "Current log level", body = LogSetupResponse)
    ),
    tag = "logs"
)]
pub async fn log_setup_get(State(state): State<LogState>) -> Json<LogSetupResponse> {
    Json(LogSetupResponse::new(state.level()))
}

/// Change le niveau de journalisation sans redémarrer
#[utoipa::path(
    post,
    path = "/api/logs/log_setup",
    request_body = LogSetupRequest,
    responses(
        (status = 200, description = "Level changed", body = LogSetupResponse),
        (status = 400, description = "Unknown level")
    ),
    tag = "logs"
)]
pub async fn log_setup_post(State(state): State<LogState>, Json(request): Json<LogSetupRequest>) -> Response {
    match parse_level(&request.level) {
        Some(level) => {
            state.set_level(level);
            tracing::info!(level = %level, "Log level changed");
            Json(LogSetupResponse::new(level)).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_level",
                "message": format!("Unknown log level '{}'", request.level),
            })),
        )
            .into_response(),
    }
}

/// Interprète un nom de niveau, sans tenir compte de la casse
pub fn parse_level(name: &str) -> Option<Level> {
    LEVELS
        .into_iter()
        .find(|level| level.as_str().eq_ignore_ascii_case(name.trim()))
}

/// Router de l'API de niveau (monté sous `/api/logs`)
pub fn create_logs_router(state: LogState) -> Router {
    Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(log_setup_get, log_setup_post),
    components(schemas(LogSetupRequest, LogSetupResponse, LogEntry)),
    tags((name = "logs", description = "Runtime log level"))
)]
pub struct LogsApiDoc;
