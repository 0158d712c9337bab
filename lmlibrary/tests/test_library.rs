use async_trait::async_trait;
use lmacquire::{AcquireSettings, Coordinator, TrackStatus};
use lmcache::{CacheLimits, CacheStore, TrackId};
use lmfetch::{FetchError, FetchedAudio, Fetcher, TrackMetadata};
use lmlibrary::{
    CatalogSource, FileCatalog, HttpCatalog, Library, LibraryError, LibraryRecord,
    SessionCredentials, UNKNOWN_ARTIST,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Fetcher instantané qui retient les références demandées
#[derive(Default)]
struct RecordingFetcher {
    references: Mutex<Vec<String>>,
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, FetchError> {
        self.references.lock().unwrap().push(reference.to_string());
        let path = output_stem.with_extension("m4a");
        tokio::fs::write(&path, b"0123456789").await.unwrap();
        Ok(FetchedAudio {
            path,
            content_type: "audio/mp4".to_string(),
            size_bytes: 10,
            metadata: Some(TrackMetadata {
                title: Some("Fetched title".to_string()),
                artist: Some("Fetched artist".to_string()),
                thumbnail: Some("https://img.example/cover.jpg".to_string()),
                duration_secs: Some(12.0),
            }),
        })
    }
}

fn create_test_library() -> (TempDir, Arc<RecordingFetcher>, Arc<Library>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        CacheStore::open(temp_dir.path().join("cache"), CacheLimits::unlimited()).unwrap(),
    );
    let fetcher = Arc::new(RecordingFetcher::default());
    let coordinator = Coordinator::new(store, fetcher.clone(), AcquireSettings::default());
    (temp_dir, fetcher, Arc::new(Library::new(coordinator)))
}

fn id(s: &str) -> TrackId {
    TrackId::new(s).unwrap()
}

fn write_catalog(dir: &TempDir, name: &str, content: &str) -> FileCatalog {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    FileCatalog::new(path)
}

#[tokio::test]
async fn test_refresh_from_yaml_file() {
    let (dir, _fetcher, library) = create_test_library();
    let catalog = write_catalog(
        &dir,
        "library.yaml",
        "- id: abc\n  title: First\n  artist: Someone\n- id: def\n  title: Second\n",
    );

    assert_eq!(library.refresh(&catalog).await.unwrap(), 2);
    assert_eq!(library.len(), 2);

    let record = library.resolve(&id("abc")).unwrap();
    assert_eq!(record.title, "First");
    assert_eq!(record.artists, vec!["Someone"]);

    let err = library.resolve(&id("unknown")).unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_refresh_from_json_file_and_missing_file() {
    let (dir, _fetcher, library) = create_test_library();
    let catalog = write_catalog(&dir, "library.json", r#"{"tracks": [{"id": "j1", "title": "Json"}]}"#);
    assert_eq!(library.refresh(&catalog).await.unwrap(), 1);

    let missing = FileCatalog::new(dir.path().join("nothing.yaml"));
    assert!(missing.fetch_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_replaces_catalog_but_keeps_local_records() {
    let (dir, _fetcher, library) = create_test_library();
    let first = write_catalog(&dir, "v1.yaml", "- id: a\n  title: A\n- id: b\n  title: B\n");
    library.refresh(&first).await.unwrap();

    let mut local = LibraryRecord::new(id("local"), "Added by hand");
    local.album = Some("Bootleg".to_string());
    library.upsert(local);
    library.merge_metadata(
        &id("c"),
        &TrackMetadata {
            thumbnail: Some("https://img.example/c.jpg".to_string()),
            ..TrackMetadata::default()
        },
    );

    let second = write_catalog(&dir, "v2.yaml", "- id: b\n  title: B v2\n- id: c\n  title: C\n");
    library.refresh(&second).await.unwrap();

    assert!(!library.contains(&id("a")));
    assert_eq!(library.resolve(&id("b")).unwrap().title, "B v2");
    assert_eq!(library.resolve(&id("local")).unwrap().album.as_deref(), Some("Bootleg"));

    // Le catalogue l'emporte mais les trous sont comblés par la fiche locale
    let c = library.resolve(&id("c")).unwrap();
    assert_eq!(c.title, "C");
    assert_eq!(c.thumbnail.as_deref(), Some("https://img.example/c.jpg"));
}

#[tokio::test]
async fn test_status_delegates_to_coordinator() {
    let (_dir, fetcher, library) = create_test_library();
    let mut record = LibraryRecord::new(id("vid1"), "Video");
    record.source_url = Some("https://video.example/watch?v=vid1".to_string());
    library.upsert(record);

    assert_eq!(library.status(&id("vid1")).await.unwrap(), TrackStatus::Missing);
    assert!(matches!(
        library.status(&id("nope")).await,
        Err(LibraryError::NotFound(_))
    ));

    let entry = library.ensure_cached(&id("vid1")).await.unwrap().unwrap();
    assert_eq!(entry.size_bytes, 10);
    assert_eq!(library.status(&id("vid1")).await.unwrap(), TrackStatus::Ready);
    assert_eq!(
        *fetcher.references.lock().unwrap(),
        vec!["https://video.example/watch?v=vid1".to_string()]
    );

    let listed = library.list_with_status().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].1, TrackStatus::Ready);
}

#[tokio::test]
async fn test_search_and_group_by_artist() {
    let (dir, _fetcher, library) = create_test_library();
    let catalog = write_catalog(
        &dir,
        "library.yaml",
        concat!(
            "- id: t1\n  title: Get Lucky\n  artist: Daft Punk & Pharrell Williams\n  album: Random Access Memories\n",
            "- id: t2\n  title: Around the World\n  artist: Daft Punk\n",
            "- id: t3\n  title: Happy\n  artist: Pharrell Williams\n",
            "- id: t4\n  title: Untitled\n",
        ),
    );
    library.refresh(&catalog).await.unwrap();

    let ids = |records: Vec<LibraryRecord>| -> Vec<String> {
        records.into_iter().map(|r| r.id.to_string()).collect()
    };
    assert_eq!(ids(library.search("pharrell")), vec!["t1", "t3"]);
    assert_eq!(ids(library.search("memories LUCKY")), vec!["t1"]);
    assert!(library.search("nobody").is_empty());
    assert_eq!(library.search("  ").len(), 4);

    let groups = library.group_by_artist();
    assert_eq!(
        groups.keys().cloned().collect::<Vec<_>>(),
        vec!["Daft Punk", "Pharrell Williams", UNKNOWN_ARTIST]
    );
    assert_eq!(ids(groups["Daft Punk"].clone()), vec!["t2", "t1"]);
    assert_eq!(ids(groups["Pharrell Williams"].clone()), vec!["t3"]);
    assert_eq!(ids(groups[UNKNOWN_ARTIST].clone()), vec!["t4"]);
}

#[tokio::test]
async fn test_unknown_track_is_not_fetched() {
    let (_dir, fetcher, library) = create_test_library();
    assert!(library.ensure_cached(&id("ghost")).await.unwrap_err().is_not_found());
    assert!(library.prefetch(&id("ghost")).await.unwrap_err().is_not_found());
    assert!(fetcher.references.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_follow_acquisitions_merges_metadata() {
    let (_dir, _fetcher, library) = create_test_library();
    library.upsert(LibraryRecord::new(id("meta"), "Catalog title"));
    let _listener = library.clone().follow_acquisitions();

    library.ensure_cached(&id("meta")).await.unwrap().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let record = library.resolve(&id("meta")).unwrap();
        if record.thumbnail.is_some() {
            assert_eq!(record.title, "Catalog title");
            assert_eq!(record.artist.as_deref(), Some("Fetched artist"));
            assert_eq!(record.duration_secs, Some(12.0));
            break;
        }
        assert!(Instant::now() < deadline, "metadata never merged");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_http_catalog_sends_credentials() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/catalog")
        .match_header("cookie", "SID=abc; HSID=def")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id": "remote1", "title": "Remote", "duration_secs": 201.5}]"#)
        .create_async()
        .await;

    let credentials = Arc::new(SessionCredentials::parse("SID=abc; HSID=def").unwrap());
    let catalog = HttpCatalog::new(format!("{}/catalog", server.url()), credentials).unwrap();

    let records = catalog.fetch_records().await.unwrap();
    mock.assert_async().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id.as_str(), "remote1");
    assert_eq!(records[0].duration_secs, Some(201.5));
}

#[tokio::test]
async fn test_http_catalog_error_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/catalog")
        .with_status(401)
        .with_body("expired session")
        .create_async()
        .await;

    let catalog = HttpCatalog::new(
        format!("{}/catalog", server.url()),
        Arc::new(SessionCredentials::empty()),
    )
    .unwrap();

    match catalog.fetch_records().await {
        Err(LibraryError::CatalogStatus { status, message, .. }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "expired session");
        }
        other => panic!("expected a catalog error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_records() {
    let (dir, _fetcher, library) = create_test_library();
    let good = write_catalog(&dir, "good.yaml", "- id: keep\n  title: Keep\n");
    library.refresh(&good).await.unwrap();

    let broken = write_catalog(&dir, "broken.json", "{oops");
    assert!(library.refresh(&broken).await.is_err());
    assert!(library.contains(&id("keep")));
}
