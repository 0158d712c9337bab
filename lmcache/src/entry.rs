use crate::track_id::TrackId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// État d'une piste vis-à-vis du cache
///
/// Seuls `Ready` et `Failed` sont persistés. `Fetching` n'existe que
/// pendant un téléchargement et appartient au coordinateur ; `Missing`
/// est l'état de toute piste sans artefact valide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum CacheState {
    Missing,
    Fetching,
    Ready,
    Failed,
}

impl CacheState {
    pub(crate) fn as_db_str(&self) -> &'static str {
        match self {
            CacheState::Missing => "missing",
            CacheState::Fetching => "fetching",
            CacheState::Ready => "ready",
            CacheState::Failed => "failed",
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(CacheState::Ready),
            "failed" => Some(CacheState::Failed),
            _ => None,
        }
    }
}

/// Entrée de cache : une piste et son artefact éventuel
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CacheEntry {
    /// Identifiant de la piste
    pub id: TrackId,
    pub state: CacheState,
    /// Chemin absolu de l'artefact (uniquement quand `Ready`)
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub path: Option<PathBuf>,
    #[cfg_attr(feature = "openapi", schema(example = 4_194_304))]
    pub size_bytes: u64,
    #[cfg_attr(feature = "openapi", schema(example = "audio/mpeg"))]
    pub content_type: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Dernière erreur (uniquement quand `Failed`)
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Nombre de lectures en streaming
    pub hits: u64,
    pub last_used: Option<DateTime<Utc>>,
    /// Métadonnées libres renvoyées par l'outil de téléchargement
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
}

impl CacheEntry {
    pub fn is_ready(&self) -> bool {
        self.state == CacheState::Ready
    }

    /// Date de référence pour la politique LRU (dernière lecture, sinon téléchargement).
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.last_used.or(self.fetched_at)
    }
}
