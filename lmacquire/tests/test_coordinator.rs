use async_trait::async_trait;
use lmacquire::{AcquireError, AcquireEvent, AcquireSettings, Coordinator, TrackStatus};
use lmcache::{CacheLimits, CacheState, CacheStore, TrackId};
use lmfetch::{FetchError, FetchErrorKind, FetchedAudio, Fetcher, TrackMetadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail(FetchErrorKind),
    FailFirst,
}

/// Fetcher de test : compte les appels, simule durée, échecs et annulation
struct FakeFetcher {
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

impl FakeFetcher {
    fn new(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Marque le fetch comme annulé si le futur est abandonné avant la fin
struct CancelGuard<'a> {
    fetcher: &'a FakeFetcher,
    completed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.active.fetch_sub(1, Ordering::SeqCst);
        if !self.completed {
            self.fetcher.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let mut guard = CancelGuard {
            fetcher: self,
            completed: false,
        };

        tokio::fs::write(output_stem.with_extension("part"), b"partial")
            .await
            .unwrap();
        tokio::time::sleep(self.delay).await;

        let result = match self.behavior {
            Behavior::Fail(kind) => Err(FetchError::new(kind, "simulated failure")),
            Behavior::FailFirst if call == 1 => Err(FetchError::process_failure("first call fails")),
            Behavior::Succeed | Behavior::FailFirst => {
                let path = output_stem.with_extension("mp3");
                let data = format!("audio for {}", reference).repeat(20);
                tokio::fs::write(&path, &data).await.unwrap();
                Ok(FetchedAudio {
                    path,
                    content_type: "audio/mpeg".to_string(),
                    size_bytes: data.len() as u64,
                    metadata: Some(TrackMetadata {
                        title: Some(format!("Title {}", reference)),
                        artist: Some("Artist".to_string()),
                        thumbnail: None,
                        duration_secs: Some(180.0),
                    }),
                })
            }
        };
        guard.completed = true;
        result
    }
}

fn setup(fetcher: Arc<FakeFetcher>, settings: AcquireSettings) -> (TempDir, Coordinator) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CacheStore::open(temp_dir.path(), CacheLimits::unlimited()).unwrap());
    (temp_dir, Coordinator::new(store, fetcher, settings))
}

fn settings(pool: usize, backoff: Duration) -> AcquireSettings {
    AcquireSettings {
        max_concurrent_fetches: pool,
        retry_backoff: backoff,
        fetch_timeout: None,
    }
}

fn id(s: &str) -> TrackId {
    TrackId::new(s).unwrap()
}

/// Fichiers sous la racine du cache, hors base SQLite
fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if !path.file_name().unwrap().to_string_lossy().starts_with("cache.db") {
                out.push(path);
            }
        }
    }
    out
}

async fn wait_for_status(coordinator: &Coordinator, track: &TrackId, expected: TrackStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while coordinator.status(track).await.unwrap() != expected {
        assert!(Instant::now() < deadline, "timed out waiting for {:?}", expected);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_fetch() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(200));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(3, Duration::from_secs(30)));
    let track = id("shared");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let coordinator = coordinator.clone();
        let track = track.clone();
        handles.push(tokio::spawn(async move { coordinator.ensure_cached(&track).await }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.calls(), 1);
    let first = &outcomes[0];
    assert_eq!(first.state, CacheState::Ready);
    for entry in &outcomes {
        assert_eq!(entry.path, first.path);
        assert_eq!(entry.size_bytes, first.size_bytes);
    }
    let data = std::fs::read(first.path.as_ref().unwrap()).unwrap();
    assert_eq!(data, "audio for shared".repeat(20).into_bytes());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ready_is_idempotent() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(10));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(3, Duration::from_secs(30)));
    let track = id("again");

    coordinator.ensure_cached(&track).await.unwrap();
    coordinator.ensure_cached(&track).await.unwrap();
    coordinator.ensure_cached_from(&track, "https://elsewhere").await.unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(coordinator.status(&track).await.unwrap(), TrackStatus::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_fails_every_waiter_without_partial_file() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_secs(30));
    let (dir, coordinator) = setup(
        fetcher.clone(),
        AcquireSettings {
            max_concurrent_fetches: 2,
            retry_backoff: Duration::from_secs(30),
            fetch_timeout: Some(Duration::from_millis(200)),
        },
    );
    let track = id("slow");

    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        let track = track.clone();
        handles.push(tokio::spawn(async move { coordinator.ensure_cached(&track).await }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Err(AcquireError::Fetch(err)) => assert_eq!(err.kind, FetchErrorKind::Timeout),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    assert_eq!(fetcher.calls(), 1);
    assert!(files_under(dir.path()).is_empty());
    assert_eq!(coordinator.status(&track).await.unwrap(), TrackStatus::Failed);
    assert!(coordinator.last_failure(&track).unwrap().is_timeout());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_tracks_do_not_block_each_other() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(400));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(2, Duration::from_secs(30)));

    let track_a = id("track-a");
    let track_b = id("track-b");

    let started = Instant::now();
    let (a, b) = tokio::join!(
        coordinator.ensure_cached(&track_a),
        coordinator.ensure_cached(&track_b)
    );
    let elapsed = started.elapsed();

    a.unwrap();
    b.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert!(elapsed < Duration::from_millis(750), "took {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_simultaneous_fetches() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(150));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(2, Duration::from_secs(30)));

    let mut handles = Vec::new();
    for n in 0..5 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.ensure_cached(&id(&format!("pool-{}", n))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fetcher.calls(), 5);
    assert_eq!(fetcher.max_active.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_after_backoff() {
    let fetcher = FakeFetcher::new(Behavior::FailFirst, Duration::from_millis(10));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(3, Duration::from_millis(300)));
    let track = id("flaky");

    let first = coordinator.ensure_cached(&track).await;
    assert!(matches!(first, Err(AcquireError::Fetch(ref e)) if e.kind == FetchErrorKind::ProcessFailure));

    // Dans la fenêtre d'attente : pas de nouvel appel
    match coordinator.ensure_cached(&track).await {
        Err(AcquireError::BackingOff { last, retry_in }) => {
            assert_eq!(last.kind, FetchErrorKind::ProcessFailure);
            assert!(retry_in <= Duration::from_millis(300));
        }
        other => panic!("expected backoff, got {:?}", other),
    }
    assert_eq!(fetcher.calls(), 1);

    tokio::time::sleep(Duration::from_millis(350)).await;
    let entry = coordinator.ensure_cached(&track).await.unwrap();
    assert_eq!(entry.state, CacheState::Ready);
    assert_eq!(fetcher.calls(), 2);
    assert!(coordinator.last_failure(&track).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_backoff_retries_immediately() {
    let fetcher = FakeFetcher::new(Behavior::Fail(FetchErrorKind::EmptyOutput), Duration::ZERO);
    let (_dir, coordinator) = setup(fetcher.clone(), settings(1, Duration::ZERO));
    let track = id("always-empty");

    for _ in 0..3 {
        let err = coordinator.ensure_cached(&track).await.unwrap_err();
        assert!(matches!(err, AcquireError::Fetch(_)));
    }
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_cancelled_only_when_last_waiter_leaves() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_secs(30));
    let (dir, coordinator) = setup(fetcher.clone(), settings(2, Duration::from_secs(30)));
    let track = id("abandoned");

    // Les deux intérêts existent avant tout abandon
    let first = coordinator.join_or_start(&track, "ref").unwrap();
    let second = coordinator.join_or_start(&track, "ref").unwrap();
    let first = tokio::spawn(first.wait());
    let second = tokio::spawn(second.wait());
    wait_for_status(&coordinator, &track, TrackStatus::Fetching).await;

    first.abort();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!fetcher.cancelled.load(Ordering::SeqCst));
    assert_eq!(coordinator.status(&track).await.unwrap(), TrackStatus::Fetching);

    second.abort();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fetcher.cancelled.load(Ordering::SeqCst));
    assert!(coordinator.in_flight().is_empty());
    assert_eq!(coordinator.status(&track).await.unwrap(), TrackStatus::Missing);
    assert!(files_under(dir.path()).is_empty());
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prefetch_holds_its_own_interest() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(300));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(2, Duration::from_secs(30)));
    let track = id("prefetched");

    let status = coordinator.prefetch(&track, "ref").await.unwrap();
    assert!(matches!(status, TrackStatus::Queued | TrackStatus::Fetching));

    let waiter = {
        let coordinator = coordinator.clone();
        let track = track.clone();
        tokio::spawn(async move { coordinator.ensure_cached(&track).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    waiter.abort();

    wait_for_status(&coordinator, &track, TrackStatus::Ready).await;
    assert_eq!(fetcher.calls(), 1);
    assert!(!fetcher.cancelled.load(Ordering::SeqCst));
    assert_eq!(
        coordinator.prefetch(&track, "ref").await.unwrap(),
        TrackStatus::Ready
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_are_published() {
    let fetcher = FakeFetcher::new(Behavior::Succeed, Duration::from_millis(10));
    let (_dir, coordinator) = setup(fetcher.clone(), settings(2, Duration::from_secs(30)));
    let mut events = coordinator.subscribe();
    let track = id("observed");

    coordinator.ensure_cached(&track).await.unwrap();

    assert!(matches!(events.recv().await.unwrap(), AcquireEvent::Queued { .. }));
    assert!(matches!(events.recv().await.unwrap(), AcquireEvent::Started { .. }));
    match events.recv().await.unwrap() {
        AcquireEvent::Ready { id, metadata, .. } => {
            assert_eq!(id, track);
            assert_eq!(metadata.unwrap().title.as_deref(), Some("Title observed"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evict_forgets_failure() {
    let fetcher = FakeFetcher::new(Behavior::FailFirst, Duration::ZERO);
    let (_dir, coordinator) = setup(fetcher.clone(), settings(1, Duration::from_secs(3600)));
    let track = id("forgiven");

    assert!(coordinator.ensure_cached(&track).await.is_err());
    assert!(matches!(
        coordinator.ensure_cached(&track).await,
        Err(AcquireError::BackingOff { .. })
    ));

    assert!(coordinator.evict(&track).await.unwrap());
    coordinator.ensure_cached(&track).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}
