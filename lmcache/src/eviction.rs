//! Politiques d'éviction du cache
//!
//! Le store ne décide jamais seul quoi supprimer : après chaque `put`, il
//! demande à sa politique quelles entrées `Ready` doivent partir pour
//! respecter les [`CacheLimits`], puis appelle `evict` sur chacune.

use crate::entry::CacheEntry;
use crate::track_id::TrackId;
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Limites du cache (0 = illimité)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CacheLimits {
    /// Nombre maximal d'artefacts
    pub max_entries: usize,
    /// Taille totale maximale des artefacts, en octets
    pub max_bytes: u64,
}

impl CacheLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_entries == 0 && self.max_bytes == 0
    }

    /// Vérifie si un cache de `entries` artefacts totalisant `bytes` octets dépasse les limites
    pub fn exceeded_by(&self, entries: usize, bytes: u64) -> bool {
        (self.max_entries > 0 && entries > self.max_entries)
            || (self.max_bytes > 0 && bytes > self.max_bytes)
    }
}

/// Politique d'éviction pluggable
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Choisit les entrées à évincer parmi `ready`.
    ///
    /// `protect` ne doit jamais être retourné (c'est en général l'entrée
    /// qui vient d'être stockée).
    fn select_victims(
        &self,
        ready: &[CacheEntry],
        limits: &CacheLimits,
        protect: Option<&TrackId>,
    ) -> Vec<TrackId>;
}

/// Éviction des pistes les moins récemment écoutées, puis les moins écoutées
#[derive(Debug, Default, Clone, Copy)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victims(
        &self,
        ready: &[CacheEntry],
        limits: &CacheLimits,
        protect: Option<&TrackId>,
    ) -> Vec<TrackId> {
        if limits.is_unlimited() {
            return Vec::new();
        }

        let mut entries = ready.len();
        let mut bytes: u64 = ready.iter().map(|e| e.size_bytes).sum();
        if !limits.exceeded_by(entries, bytes) {
            return Vec::new();
        }

        let mut candidates: Vec<&CacheEntry> = ready
            .iter()
            .filter(|e| Some(&e.id) != protect)
            .collect();
        // `None` (jamais utilisée) passe avant toute date
        candidates.sort_by(|a, b| {
            a.recency()
                .cmp(&b.recency())
                .then(a.hits.cmp(&b.hits))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut victims = Vec::new();
        for entry in candidates {
            if !limits.exceeded_by(entries, bytes) {
                break;
            }
            victims.push(entry.id.clone());
            entries -= 1;
            bytes = bytes.saturating_sub(entry.size_bytes);
        }
        victims
    }
}

/// Ne supprime jamais rien
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn name(&self) -> &'static str {
        "none"
    }

    fn select_victims(&self, _: &[CacheEntry], _: &CacheLimits, _: Option<&TrackId>) -> Vec<TrackId> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheState;
    use chrono::{Duration, Utc};

    fn entry(id: &str, age_secs: i64, hits: u64, size: u64) -> CacheEntry {
        let t = Utc::now() - Duration::seconds(age_secs);
        CacheEntry {
            id: TrackId::new(id).unwrap(),
            state: CacheState::Ready,
            path: None,
            size_bytes: size,
            content_type: Some("audio/mpeg".into()),
            fetched_at: Some(t),
            last_error: None,
            failed_at: None,
            hits,
            last_used: Some(t),
            metadata: None,
        }
    }

    #[test]
    fn test_lru_by_count() {
        let ready = vec![entry("a", 10, 5, 1), entry("b", 300, 1, 1), entry("c", 100, 1, 1)];
        let limits = CacheLimits { max_entries: 2, max_bytes: 0 };

        let victims = LruPolicy.select_victims(&ready, &limits, None);
        assert_eq!(victims, vec![TrackId::new("b").unwrap()]);
    }

    #[test]
    fn test_lru_by_bytes_respects_protect() {
        let ready = vec![entry("new", 1000, 0, 60), entry("old", 500, 3, 50), entry("mid", 10, 3, 40)];
        let limits = CacheLimits { max_entries: 0, max_bytes: 100 };
        let protect = TrackId::new("new").unwrap();

        let victims = LruPolicy.select_victims(&ready, &limits, Some(&protect));
        assert_eq!(victims, vec![TrackId::new("old").unwrap()]);
    }

    #[test]
    fn test_within_limits_or_unlimited() {
        let ready = vec![entry("a", 1, 0, 10), entry("b", 2, 0, 10)];
        let limits = CacheLimits { max_entries: 2, max_bytes: 20 };
        assert!(LruPolicy.select_victims(&ready, &limits, None).is_empty());
        assert!(LruPolicy
            .select_victims(&ready, &CacheLimits::unlimited(), None)
            .is_empty());
        assert!(NoEviction
            .select_victims(&ready, &CacheLimits { max_entries: 1, max_bytes: 1 }, None)
            .is_empty());
    }
}
