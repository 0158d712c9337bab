#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use lmacquire::{AcquireSettings, Coordinator};
use lmcache::{CacheLimits, CacheStore, TrackId};
use lmfetch::{FetchError, FetchedAudio, Fetcher, TrackMetadata};
use lmlibrary::{History, Library, LibraryRecord, SessionStore};
use lmserver::{LanMusicExt, Server};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TRACK_SIZE: usize = 1000;

/// Contenu déterministe d'un artefact de test
pub fn track_bytes() -> Vec<u8> {
    (0..TRACK_SIZE).map(|i| (i % 251) as u8).collect()
}

/// Fetcher scripté par la référence demandée
///
/// - `timeout-*` : échec par dépassement de délai
/// - `broken-*` : échec du processus
/// - autre : écrit un `.mp3` de [`TRACK_SIZE`] octets après `delay`
pub struct ScriptedFetcher {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if reference.starts_with("timeout-") {
            return Err(FetchError::timeout(format!("{} took too long", reference)));
        }
        if reference.starts_with("broken-") {
            return Err(FetchError::process_failure("exit status: 1"));
        }

        let path = output_stem.with_extension("mp3");
        tokio::fs::write(&path, track_bytes()).await.unwrap();
        Ok(FetchedAudio {
            path,
            content_type: "audio/mpeg".to_string(),
            size_bytes: TRACK_SIZE as u64,
            metadata: Some(TrackMetadata {
                title: Some(format!("Title of {}", reference)),
                ..TrackMetadata::default()
            }),
        })
    }
}

pub struct TestApp {
    pub _dir: TempDir,
    pub fetcher: Arc<ScriptedFetcher>,
    pub library: Arc<Library>,
    pub history: Arc<History>,
    pub sessions: Arc<SessionStore>,
    pub router: Router,
}

pub fn id(s: &str) -> TrackId {
    TrackId::new(s).unwrap()
}

/// Monte un serveur complet sur un catalogue de quelques pistes
pub async fn create_test_app(delay: Duration, retry_backoff: Duration) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CacheStore::open(dir.path().join("cache"), CacheLimits::unlimited()).unwrap());
    let fetcher = Arc::new(ScriptedFetcher::new(delay));
    let settings = AcquireSettings {
        max_concurrent_fetches: 2,
        retry_backoff,
        fetch_timeout: None,
    };
    let library = Arc::new(Library::new(Coordinator::new(store, fetcher.clone(), settings)));

    for (track, title, artist) in [
        ("song1", "First song", Some("Alice")),
        ("song2", "Second song", Some("Alice & Bob")),
        ("timeout-1", "Slow song", Some("Bob")),
        ("broken-1", "Broken song", None),
    ] {
        let mut record = LibraryRecord::new(id(track), title);
        record.artist = artist.map(str::to_string);
        library.upsert(record);
    }

    let history = Arc::new(History::new(3));
    let sessions = Arc::new(SessionStore::new());

    let mut server = Server::new("LanMusicTest", "127.0.0.1", 0);
    server
        .init_lanmusic(library.clone(), history.clone(), sessions.clone())
        .unwrap();
    let router = server.router();

    TestApp {
        _dir: dir,
        fetcher,
        library,
        history,
        sessions,
        router,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_range(&self, uri: &str, range: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header("range", range)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(&self, method: &str, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
