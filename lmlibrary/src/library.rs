//! Library Index
//!
//! Catalogue en mémoire des pistes connues. Les lectures prennent un
//! `RwLock` le temps d'une copie et n'attendent jamais d'E/S ; l'état du
//! cache n'est pas stocké ici mais demandé au coordinateur à chaque appel,
//! il n'est donc jamais périmé.

use crate::catalog::CatalogSource;
use crate::error::{LibraryError, Result};
use crate::record::LibraryRecord;
use lmacquire::{AcquireEvent, Coordinator, Outcome, TrackStatus};
use lmcache::TrackId;
use lmfetch::TrackMetadata;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Groupe des pistes sans artiste connu
pub const UNKNOWN_ARTIST: &str = "Unknown";

/// Provenance d'une fiche
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Fournie par la dernière synchronisation du catalogue
    Catalog,
    /// Ajoutée localement ou apprise des métadonnées du fetcher
    Local,
}

#[derive(Debug, Clone)]
struct Known {
    record: LibraryRecord,
    origin: Origin,
}

/// Catalogue des pistes connues, adossé au coordinateur pour l'état du cache
pub struct Library {
    coordinator: Coordinator,
    records: RwLock<HashMap<TrackId, Known>>,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("records", &self.len())
            .finish()
    }
}

impl Library {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TrackId, Known>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TrackId, Known>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retourne la fiche d'une piste, ou `NotFound`
    pub fn resolve(&self, id: &TrackId) -> Result<LibraryRecord> {
        self.read()
            .get(id)
            .map(|known| known.record.clone())
            .ok_or_else(|| LibraryError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// État courant d'une piste connue (délégué au coordinateur)
    pub async fn status(&self, id: &TrackId) -> Result<TrackStatus> {
        if !self.contains(id) {
            return Err(LibraryError::NotFound(id.clone()));
        }
        Ok(self.coordinator.status(id).await?)
    }

    /// Toutes les fiches, triées par artiste puis titre
    pub fn list(&self) -> Vec<LibraryRecord> {
        let mut records: Vec<LibraryRecord> =
            self.read().values().map(|known| known.record.clone()).collect();
        records.sort_by(|a, b| {
            a.artist
                .cmp(&b.artist)
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Fiches dont le titre, un artiste ou l'album contient chaque mot de `query`
    pub fn search(&self, query: &str) -> Vec<LibraryRecord> {
        let mut records = self.list();
        records.retain(|record| record.matches(query));
        records
    }

    /// Fiches regroupées par artiste principal, chaque groupe trié par titre
    ///
    /// Les pistes sans artiste sont rangées sous [`UNKNOWN_ARTIST`].
    pub fn group_by_artist(&self) -> BTreeMap<String, Vec<LibraryRecord>> {
        let mut groups: BTreeMap<String, Vec<LibraryRecord>> = BTreeMap::new();
        for record in self.list() {
            let artist = record.primary_artist().unwrap_or(UNKNOWN_ARTIST).to_string();
            groups.entry(artist).or_default().push(record);
        }
        for records in groups.values_mut() {
            records.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        }
        groups
    }

    /// Toutes les fiches avec l'état de leur artefact
    pub async fn list_with_status(&self) -> Result<Vec<(LibraryRecord, TrackStatus)>> {
        self.with_status(self.list()).await
    }

    /// Associe à chaque fiche l'état courant de son artefact
    pub async fn with_status(
        &self,
        records: Vec<LibraryRecord>,
    ) -> Result<Vec<(LibraryRecord, TrackStatus)>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let status = self.coordinator.status(&record.id).await?;
            out.push((record, status));
        }
        Ok(out)
    }

    /// Ajoute ou remplace une fiche ; retourne la précédente
    pub fn upsert(&self, mut record: LibraryRecord) -> Option<LibraryRecord> {
        record.normalize();
        let id = record.id.clone();
        let previous = self.write().insert(
            id.clone(),
            Known {
                record,
                origin: Origin::Local,
            },
        );
        debug!(track = %id, "Library record upserted");
        previous.map(|known| known.record)
    }

    /// Retire une fiche (l'artefact éventuel reste en cache)
    pub fn remove(&self, id: &TrackId) -> Option<LibraryRecord> {
        self.write().remove(id).map(|known| known.record)
    }

    /// Complète une fiche avec les métadonnées du fetcher, ou la crée
    pub fn merge_metadata(&self, id: &TrackId, metadata: &TrackMetadata) -> LibraryRecord {
        let mut records = self.write();
        let known = records.entry(id.clone()).or_insert_with(|| Known {
            record: LibraryRecord::from_metadata(id.clone(), metadata),
            origin: Origin::Local,
        });
        known.record.merge_metadata(metadata);
        known.record.clone()
    }

    /// Remplace les fiches du catalogue par celles de `source`
    ///
    /// Les fiches locales sont conservées ; quand le catalogue fournit la
    /// même piste, sa fiche l'emporte et les champs manquants sont repris
    /// de la fiche locale. Retourne le nombre de fiches du catalogue.
    pub async fn refresh(&self, source: &dyn CatalogSource) -> Result<usize> {
        let fetched = source.fetch_records().await?;
        let count = fetched.len();

        let mut records = self.write();
        records.retain(|_, known| known.origin == Origin::Local);
        for mut record in fetched {
            if let Some(local) = records.get(&record.id) {
                record.fill_from(&local.record);
            }
            records.insert(
                record.id.clone(),
                Known {
                    record,
                    origin: Origin::Catalog,
                },
            );
        }
        let total = records.len();
        drop(records);

        info!(
            source = source.name(),
            catalog = count,
            total,
            "Library refreshed"
        );
        Ok(count)
    }

    /// Relance [`refresh`](Self::refresh) périodiquement (la première fois immédiatement)
    pub fn spawn_refresh(
        self: Arc<Self>,
        source: Arc<dyn CatalogSource>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh(source.as_ref()).await {
                    warn!(source = source.name(), "Library refresh failed: {}", e);
                }
            }
        })
    }

    /// Reporte dans le catalogue les métadonnées des pistes téléchargées
    pub fn follow_acquisitions(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.coordinator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AcquireEvent::Ready {
                        id,
                        metadata: Some(metadata),
                        ..
                    }) => {
                        self.merge_metadata(&id, &metadata);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Library missed acquisition events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Garantit que l'artefact d'une piste connue est en cache
    pub async fn ensure_cached(&self, id: &TrackId) -> Result<Outcome> {
        let record = self.resolve(id)?;
        Ok(self.coordinator.ensure_cached_from(id, record.reference()).await)
    }

    /// Lance le téléchargement d'une piste connue en arrière-plan
    pub async fn prefetch(&self, id: &TrackId) -> Result<TrackStatus> {
        let record = self.resolve(id)?;
        Ok(self.coordinator.prefetch(id, record.reference()).await?)
    }
}
