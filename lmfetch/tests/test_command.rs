#![cfg(unix)]

use lmfetch::{CommandFetcher, CommandFetcherSettings, FetchErrorKind, Fetcher};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Fetcher `sh -c <script>` : `$1` = output stem, `$2` = référence
fn sh_fetcher(script: &str, timeout: Duration, retries: u32) -> CommandFetcher {
    CommandFetcher::new(CommandFetcherSettings {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            "{output_stem}".to_string(),
            "{reference}".to_string(),
        ],
        extra_args: Vec::new(),
        audio_format: "mp3".to_string(),
        timeout,
        retries,
    })
}

fn stem_in(dir: &TempDir) -> PathBuf {
    dir.path().join("slot-1")
}

fn files_in(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_successful_fetch_with_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(
        r#"printf 'audio-bytes' > "$1.mp3"; echo '{"title":"T","uploader":"U","duration":12}'"#,
        Duration::from_secs(10),
        0,
    );

    let audio = fetcher.fetch("ref-1", &stem_in(&dir)).await.unwrap();
    assert_eq!(audio.path, stem_in(&dir).with_extension("mp3"));
    assert_eq!(audio.content_type, "audio/mpeg");
    assert_eq!(audio.size_bytes, 11);

    let meta = audio.metadata.unwrap();
    assert_eq!(meta.title.as_deref(), Some("T"));
    assert_eq!(meta.artist.as_deref(), Some("U"));
    assert_eq!(meta.duration_secs, Some(12.0));
}

#[tokio::test]
async fn test_unparsable_stdout_is_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(
        r#"printf 'x' > "$1.mp3"; echo 'not json'"#,
        Duration::from_secs(10),
        0,
    );

    let audio = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap();
    assert!(audio.metadata.is_none());
}

#[tokio::test]
async fn test_non_zero_exit_is_retried_then_fails() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");
    let fetcher = sh_fetcher(
        r#"echo x >> "$2"; echo 'ERROR: video unavailable' >&2; exit 3"#,
        Duration::from_secs(10),
        2,
    );

    let err = fetcher
        .fetch(counter.to_str().unwrap(), &stem_in(&dir))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::ProcessFailure);
    assert!(err.detail.contains("video unavailable"));

    let attempts = std::fs::read_to_string(&counter).unwrap().lines().count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_missing_output_is_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher("exit 0", Duration::from_secs(10), 2);

    let err = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::EmptyOutput);
}

#[tokio::test]
async fn test_empty_file_is_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(r#": > "$1.mp3""#, Duration::from_secs(10), 0);

    let err = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::EmptyOutput);
    assert!(files_in(&dir).is_empty());
}

#[tokio::test]
async fn test_timeout_kills_and_cleans_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(
        r#"printf 'partial' > "$1.webm.part"; exec sleep 10"#,
        Duration::from_millis(300),
        3,
    );

    let started = Instant::now();
    let err = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(files_in(&dir).is_empty());
}

#[tokio::test]
async fn test_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = CommandFetcher::new(CommandFetcherSettings {
        program: "/nonexistent/lanmusic-fetcher".to_string(),
        ..Default::default()
    });

    let err = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::ProcessFailure);
    assert!(err.detail.contains("program not found"));
}

#[tokio::test]
async fn test_prefers_requested_format() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(
        r#"printf 'a much bigger intermediate file' > "$1.webm"; printf 'mp3' > "$1.mp3""#,
        Duration::from_secs(10),
        0,
    );

    let audio = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap();
    assert_eq!(audio.path.extension().unwrap(), "mp3");
    assert_eq!(audio.size_bytes, 3);
}

/// Sous-processus en arrière-plan qui écrit après le départ de l'outil
const LATE_WRITER: &str = r#"(sleep 0.8; printf 'partial' > "$1.mp3") & sleep 10"#;

#[tokio::test]
async fn test_timeout_kills_background_writer() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(LATE_WRITER, Duration::from_millis(300), 0);

    let err = fetcher.fetch("ref", &stem_in(&dir)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::Timeout);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(files_in(&dir).is_empty(), "leftover after timeout: {:?}", files_in(&dir));
}

#[tokio::test]
async fn test_dropped_fetch_kills_background_writer() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = sh_fetcher(LATE_WRITER, Duration::from_secs(30), 0);
    let stem = stem_in(&dir);

    let abandoned = tokio::time::timeout(Duration::from_millis(300), fetcher.fetch("ref", &stem)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(files_in(&dir).is_empty(), "leftover after cancel: {:?}", files_in(&dir));
}
