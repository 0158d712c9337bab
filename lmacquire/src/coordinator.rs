//! Coordinateur d'acquisition
//!
//! Garantit qu'au plus un téléchargement tourne par identifiant :
//!
//! 1. si le Cache Store a un artefact `Ready`, il est retourné directement ;
//! 2. sinon l'appelant rejoint le vol (« flight ») en cours pour cet
//!    identifiant, ou en crée un ;
//! 3. chaque vol s'exécute dans sa propre tâche, derrière un sémaphore qui
//!    borne le nombre de téléchargements simultanés ;
//! 4. l'issue est publiée sur un canal `watch` à tous les appelants qui ont
//!    rejoint le vol, puis le vol est retiré de la table.
//!
//! Chaque appelant en attente tient un [`Interest`]. Quand le dernier
//! intérêt disparaît avant la fin (client déconnecté), la tâche est annulée :
//! le sous-processus est tué et les fichiers temporaires supprimés.

use crate::error::AcquireError;
use crate::events::{AcquireEvent, TrackStatus};
use lmcache::{CacheEntry, CacheStore, TrackId};
use lmfetch::{FetchError, Fetcher, TrackMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Issue d'une acquisition
pub type Outcome = Result<CacheEntry, AcquireError>;

/// Paramètres du coordinateur
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireSettings {
    /// Taille du pool de téléchargements simultanés
    pub max_concurrent_fetches: usize,
    /// Délai minimal avant de retenter un identifiant en échec
    pub retry_backoff: Duration,
    /// Délai maximal d'un téléchargement, en plus de celui du fetcher
    pub fetch_timeout: Option<Duration>,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 3,
            retry_backoff: Duration::from_secs(30),
            fetch_timeout: None,
        }
    }
}

/// Vol en cours pour un identifiant
struct Flight {
    generation: u64,
    tx: watch::Sender<Option<Outcome>>,
    started: AtomicBool,
}

/// Entrée de la table des vols ; tous les champs sont protégés par le verrou de la table
struct FlightSlot {
    flight: Arc<Flight>,
    interest: usize,
    committing: bool,
    abort: Option<AbortHandle>,
}

struct Failure {
    at: Instant,
    error: FetchError,
}

struct Inner {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: AcquireSettings,
    permits: Arc<Semaphore>,
    flights: Mutex<HashMap<TrackId, FlightSlot>>,
    failures: Mutex<HashMap<TrackId, Failure>>,
    events: broadcast::Sender<AcquireEvent>,
    next_generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinateur d'acquisition (clonable, état partagé)
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("settings", &self.inner.settings)
            .field("in_flight", &lock(&self.inner.flights).len())
            .finish()
    }
}

/// Intérêt d'un appelant pour un vol
///
/// Le vol est annulé quand le dernier intérêt est abandonné avant la
/// publication de l'issue.
pub struct Interest {
    inner: Arc<Inner>,
    id: TrackId,
    flight: Arc<Flight>,
    rx: watch::Receiver<Option<Outcome>>,
}

impl Interest {
    /// Attend l'issue du vol (suspension, sans attente active)
    pub async fn wait(mut self) -> Outcome {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(AcquireError::Cancelled))
    }
}

impl Drop for Interest {
    fn drop(&mut self) {
        let mut flights = lock(&self.inner.flights);
        let Some(slot) = flights.get_mut(&self.id) else {
            return;
        };
        if slot.flight.generation != self.flight.generation {
            return;
        }

        slot.interest = slot.interest.saturating_sub(1);
        if slot.interest > 0 || slot.committing {
            return;
        }

        if let Some(slot) = flights.remove(&self.id) {
            if let Some(handle) = slot.abort {
                handle.abort();
            }
            drop(flights);
            info!(track = %self.id, "Last interested client left, fetch cancelled");
            let _ = self.inner.events.send(AcquireEvent::Cancelled {
                id: self.id.clone(),
            });
        }
    }
}

impl Coordinator {
    /// Crée un coordinateur
    ///
    /// # Arguments
    ///
    /// * `store` - Cache Store partagé
    /// * `fetcher` - Adaptateur de téléchargement
    /// * `settings` - Taille du pool et politique de nouvelle tentative
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>, settings: AcquireSettings) -> Self {
        let permits = settings.max_concurrent_fetches.max(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                permits: Arc::new(Semaphore::new(permits)),
                settings,
                flights: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> &AcquireSettings {
        &self.inner.settings
    }

    /// S'abonne aux événements d'acquisition
    pub fn subscribe(&self) -> broadcast::Receiver<AcquireEvent> {
        self.inner.events.subscribe()
    }

    /// Garantit qu'une piste est en cache ; la référence de téléchargement est l'identifiant
    pub async fn ensure_cached(&self, id: &TrackId) -> Outcome {
        self.ensure_cached_from(id, id.as_str()).await
    }

    /// Garantit qu'une piste est en cache
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant de la piste (clé du cache et de la déduplication)
    /// * `reference` - Ce que le fetcher doit télécharger (URL source ou identifiant)
    ///
    /// # Returns
    ///
    /// L'entrée `Ready`, ou l'erreur partagée par tous les appelants du même vol.
    /// Dans la fenêtre d'attente après un échec, retourne
    /// [`AcquireError::BackingOff`] sans relancer de téléchargement.
    pub async fn ensure_cached_from(&self, id: &TrackId, reference: &str) -> Outcome {
        if let Some(entry) = self.inner.ready_entry(id).await? {
            debug!(track = %id, "Cache hit");
            return Ok(entry);
        }

        let interest = self.join_or_start(id, reference)?;
        interest.wait().await
    }

    /// Lance l'acquisition en arrière-plan, sans attendre son issue
    ///
    /// Le vol garde son propre intérêt jusqu'à la fin : il n'est pas annulé
    /// par le départ des autres appelants.
    pub async fn prefetch(&self, id: &TrackId, reference: &str) -> Result<TrackStatus, AcquireError> {
        if self.inner.ready_entry(id).await?.is_some() {
            return Ok(TrackStatus::Ready);
        }

        let interest = self.join_or_start(id, reference)?;
        let status = if interest.flight.started.load(Ordering::SeqCst) {
            TrackStatus::Fetching
        } else {
            TrackStatus::Queued
        };

        tokio::spawn(async move {
            let _ = interest.wait().await;
        });
        Ok(status)
    }

    /// Rejoint le vol en cours pour `id`, ou en démarre un
    ///
    /// Retourne l'intérêt de l'appelant. Échoue avec `BackingOff` si un
    /// échec récent interdit encore un nouveau téléchargement.
    pub fn join_or_start(&self, id: &TrackId, reference: &str) -> Result<Interest, AcquireError> {
        let mut flights = lock(&self.inner.flights);

        if let Some(slot) = flights.get_mut(id) {
            slot.interest += 1;
            debug!(track = %id, waiters = slot.interest, "Joining in-flight fetch");
            return Ok(self.interest_for(id, &slot.flight));
        }

        if let Some(backoff) = self.inner.backoff_for(id) {
            debug!(track = %id, "Fetch refused, still backing off");
            return Err(backoff);
        }

        let (tx, _) = watch::channel(None);
        let flight = Arc::new(Flight {
            generation: self.inner.next_generation.fetch_add(1, Ordering::SeqCst),
            tx,
            started: AtomicBool::new(false),
        });
        let interest = self.interest_for(id, &flight);
        let _ = self.inner.events.send(AcquireEvent::Queued { id: id.clone() });

        let task = tokio::spawn(Inner::run_flight(
            self.inner.clone(),
            id.clone(),
            reference.to_string(),
            flight.clone(),
        ));

        flights.insert(
            id.clone(),
            FlightSlot {
                flight,
                interest: 1,
                committing: false,
                abort: Some(task.abort_handle()),
            },
        );
        drop(flights);

        info!(track = %id, reference, "Fetch queued");
        Ok(interest)
    }

    fn interest_for(&self, id: &TrackId, flight: &Arc<Flight>) -> Interest {
        Interest {
            inner: self.inner.clone(),
            id: id.clone(),
            flight: flight.clone(),
            rx: flight.tx.subscribe(),
        }
    }

    /// État courant d'une piste
    pub async fn status(&self, id: &TrackId) -> Result<TrackStatus, AcquireError> {
        if let Some(status) = self.flight_status(id) {
            return Ok(status);
        }

        let status = match self.inner.store.lookup(id).await? {
            Some(entry) => TrackStatus::from(entry.state),
            None => TrackStatus::Missing,
        };

        if status == TrackStatus::Missing && lock(&self.inner.failures).contains_key(id) {
            return Ok(TrackStatus::Failed);
        }
        Ok(status)
    }

    fn flight_status(&self, id: &TrackId) -> Option<TrackStatus> {
        lock(&self.inner.flights).get(id).map(|slot| {
            if slot.flight.started.load(Ordering::SeqCst) {
                TrackStatus::Fetching
            } else {
                TrackStatus::Queued
            }
        })
    }

    /// Vols en cours et leur état
    pub fn in_flight(&self) -> Vec<(TrackId, TrackStatus)> {
        let flights = lock(&self.inner.flights);
        let mut list: Vec<(TrackId, TrackStatus)> = flights
            .iter()
            .map(|(id, slot)| {
                let status = if slot.flight.started.load(Ordering::SeqCst) {
                    TrackStatus::Fetching
                } else {
                    TrackStatus::Queued
                };
                (id.clone(), status)
            })
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Entrée `Ready` d'une piste, sans jamais lancer de téléchargement
    pub async fn cached(&self, id: &TrackId) -> Result<Option<CacheEntry>, AcquireError> {
        self.inner.ready_entry(id).await
    }

    /// `BackingOff` si un échec récent interdit encore un téléchargement
    pub fn backoff(&self, id: &TrackId) -> Option<AcquireError> {
        self.inner.backoff_for(id)
    }

    /// Dernier échec connu pour une piste (dans cette exécution du serveur)
    pub fn last_failure(&self, id: &TrackId) -> Option<FetchError> {
        lock(&self.inner.failures).get(id).map(|f| f.error.clone())
    }

    /// Évince une piste du cache et oublie son dernier échec
    pub async fn evict(&self, id: &TrackId) -> Result<bool, AcquireError> {
        let forgotten = lock(&self.inner.failures).remove(id).is_some();
        let removed = self.inner.store.evict(id).await?;
        Ok(removed || forgotten)
    }
}

impl Inner {
    async fn ready_entry(&self, id: &TrackId) -> Result<Option<CacheEntry>, AcquireError> {
        Ok(self.store.lookup(id).await?.filter(CacheEntry::is_ready))
    }

    fn backoff_for(&self, id: &TrackId) -> Option<AcquireError> {
        let failures = lock(&self.failures);
        let failure = failures.get(id)?;
        let elapsed = failure.at.elapsed();
        if elapsed >= self.settings.retry_backoff {
            return None;
        }
        Some(AcquireError::BackingOff {
            last: failure.error.clone(),
            retry_in: self.settings.retry_backoff - elapsed,
        })
    }

    /// Corps de la tâche d'un vol
    async fn run_flight(self: Arc<Self>, id: TrackId, reference: String, flight: Arc<Flight>) {
        let outcome = match self.permits.clone().acquire_owned().await {
            Ok(permit) => {
                let outcome = self.acquire(&id, &reference, &flight).await;
                drop(permit);
                outcome
            }
            Err(_) => Err(AcquireError::Cancelled),
        };
        self.finish(&id, &flight, outcome);
    }

    async fn acquire(&self, id: &TrackId, reference: &str, flight: &Flight) -> Outcome {
        // Un vol précédent a pu se terminer entre le lookup de l'appelant et l'enregistrement.
        if let Some(entry) = self.ready_entry(id).await? {
            debug!(track = %id, "Artifact became ready while queued");
            return Ok(entry);
        }

        flight.started.store(true, Ordering::SeqCst);
        info!(track = %id, reference, "Fetch started");
        let _ = self.events.send(AcquireEvent::Started { id: id.clone() });

        // Le slot supprime les sorties restantes à la fin de cette fonction,
        // y compris quand la tâche est annulée.
        let slot = self.store.staging_slot(id);
        let stem = slot.stem();
        let fetch = self.fetcher.fetch(reference, &stem);
        let fetched = match self.settings.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::timeout(format!(
                    "fetch did not finish within {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => fetch.await,
        };

        match fetched {
            Ok(audio) => {
                if !self.begin_commit(id, flight) {
                    return Err(AcquireError::Cancelled);
                }
                let metadata = audio.metadata.as_ref().map(TrackMetadata::to_json);
                self.store
                    .put_with_metadata(id, &audio.path, &audio.content_type, metadata.as_ref())
                    .await
                    .map_err(|e| {
                        error!(track = %id, "Unable to store fetched artifact: {}", e);
                        AcquireError::from(e)
                    })
            }
            Err(err) => {
                if let Err(e) = self.store.mark_failed(id, &err.to_string()).await {
                    error!(track = %id, "Unable to record fetch failure: {}", e);
                }
                Err(AcquireError::Fetch(err))
            }
        }
    }

    /// À partir d'ici le vol n'est plus annulable : l'artefact est en cours de stockage
    ///
    /// Retourne `false` si le vol a déjà été annulé.
    fn begin_commit(&self, id: &TrackId, flight: &Flight) -> bool {
        let mut flights = lock(&self.flights);
        match flights.get_mut(id) {
            Some(slot) if slot.flight.generation == flight.generation => {
                slot.committing = true;
                true
            }
            _ => false,
        }
    }

    /// Publie l'issue à tous les appelants et retire le vol
    fn finish(&self, id: &TrackId, flight: &Arc<Flight>, outcome: Outcome) {
        {
            let mut flights = lock(&self.flights);
            {
                let mut failures = lock(&self.failures);
                match &outcome {
                    Ok(_) => {
                        failures.remove(id);
                    }
                    Err(AcquireError::Fetch(err)) => {
                        failures.insert(
                            id.clone(),
                            Failure {
                                at: Instant::now(),
                                error: err.clone(),
                            },
                        );
                    }
                    Err(_) => {}
                }
            }

            flight.tx.send_replace(Some(outcome.clone()));

            let registered = flights
                .get(id)
                .is_some_and(|slot| slot.flight.generation == flight.generation);
            if registered {
                flights.remove(id);
            }
        }

        let event = match outcome {
            Ok(entry) => {
                info!(track = %id, size = entry.size_bytes, "Track ready");
                let metadata = entry
                    .metadata
                    .clone()
                    .and_then(|m| serde_json::from_value::<TrackMetadata>(m).ok());
                AcquireEvent::Ready {
                    id: id.clone(),
                    entry,
                    metadata,
                }
            }
            Err(error) => {
                warn!(track = %id, "Track acquisition failed: {}", error);
                AcquireEvent::Failed {
                    id: id.clone(),
                    error,
                }
            }
        };
        let _ = self.events.send(event);
    }
}
