//! Pistes récemment écoutées

use crate::record::LibraryRecord;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Historique borné, le plus récent en tête
///
/// Rejouer une piste déjà présente la remonte en tête sans doublon.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    tracks: Mutex<VecDeque<LibraryRecord>>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tracks: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LibraryRecord>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ajoute une piste en tête et retourne l'historique à jour
    pub fn push(&self, record: LibraryRecord) -> Vec<LibraryRecord> {
        let mut tracks = self.lock();
        if let Some(pos) = tracks.iter().position(|t| t.id == record.id) {
            tracks.remove(pos);
        }
        tracks.push_front(record);
        tracks.truncate(self.capacity);
        tracks.iter().cloned().collect()
    }

    pub fn list(&self) -> Vec<LibraryRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
