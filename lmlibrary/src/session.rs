//! Session de lecture sauvegardée (file d'attente et position)

use crate::record::LibraryRecord;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// File d'attente du lecteur avec la piste et la position courantes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct PlaylistSession {
    /// Position dans la piste courante, en secondes
    #[serde(default)]
    pub current_time: f32,
    #[serde(default)]
    pub current_index: u32,
    #[serde(default)]
    pub queue: Vec<LibraryRecord>,
}

/// Emplacement unique de la session sauvegardée
#[derive(Debug, Default)]
pub struct SessionStore {
    saved: Mutex<Option<PlaylistSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PlaylistSession>> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remplace la session sauvegardée
    pub fn save(&self, session: PlaylistSession) {
        *self.lock() = Some(session);
    }

    /// Session sauvegardée, `None` si aucune
    pub fn load(&self) -> Option<PlaylistSession> {
        self.lock().clone()
    }

    /// Oublie la session ; retourne `true` s'il y en avait une
    pub fn clear(&self) -> bool {
        self.lock().take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmcache::TrackId;

    #[test]
    fn test_save_load_clear() {
        let store = SessionStore::new();
        assert!(store.load().is_none());
        assert!(!store.clear());

        let session = PlaylistSession {
            current_time: 42.5,
            current_index: 1,
            queue: vec![
                LibraryRecord::new(TrackId::new("a").unwrap(), "A"),
                LibraryRecord::new(TrackId::new("b").unwrap(), "B"),
            ],
        };
        store.save(session.clone());
        assert_eq!(store.load(), Some(session));

        assert!(store.clear());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let session: PlaylistSession = serde_json::from_str(r#"{"queue": []}"#).unwrap();
        assert_eq!(session.current_index, 0);
        assert_eq!(session.current_time, 0.0);
    }
}
