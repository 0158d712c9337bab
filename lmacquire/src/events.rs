use crate::error::AcquireError;
use lmcache::{CacheEntry, CacheState, TrackId};
use lmfetch::TrackMetadata;
use serde::Serialize;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// État d'une piste tel que vu par le coordinateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum TrackStatus {
    /// Aucun artefact, aucun téléchargement
    Missing,
    /// Téléchargement enregistré, en attente d'une place dans le pool
    Queued,
    /// L'outil externe tourne
    Fetching,
    Ready,
    Failed,
}

impl From<CacheState> for TrackStatus {
    fn from(state: CacheState) -> Self {
        match state {
            CacheState::Missing => TrackStatus::Missing,
            CacheState::Fetching => TrackStatus::Fetching,
            CacheState::Ready => TrackStatus::Ready,
            CacheState::Failed => TrackStatus::Failed,
        }
    }
}

/// Événements publiés par le coordinateur (voir [`crate::Coordinator::subscribe`])
#[derive(Debug, Clone)]
pub enum AcquireEvent {
    Queued {
        id: TrackId,
    },
    Started {
        id: TrackId,
    },
    Ready {
        id: TrackId,
        entry: CacheEntry,
        metadata: Option<TrackMetadata>,
    },
    Failed {
        id: TrackId,
        error: AcquireError,
    },
    Cancelled {
        id: TrackId,
    },
}

impl AcquireEvent {
    pub fn track(&self) -> &TrackId {
        match self {
            AcquireEvent::Queued { id }
            | AcquireEvent::Started { id }
            | AcquireEvent::Ready { id, .. }
            | AcquireEvent::Failed { id, .. }
            | AcquireEvent::Cancelled { id } => id,
        }
    }
}
