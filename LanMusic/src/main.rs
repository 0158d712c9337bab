use anyhow::Result;
use lmacquire::AcquireConfigExt;
use lmcache::{CacheConfigExt, CacheStore};
use lmconfig::get_config;
use lmfetch::FetcherConfigExt;
use lmlibrary::{Library, LibraryConfigExt, SessionStore};
use lmserver::{LanMusicExt, LoggingOptions, Server};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Période du nettoyage du répertoire de staging
const STAGING_CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========
    let config = get_config();

    let mut server = Server::new_configured();
    server.init_logging(LoggingOptions::from_config(&config));

    // ========== PHASE 2 : Cache et acquisition ==========
    info!("Opening audio cache...");
    let store = config.create_cache_store()?;
    let staging_max_age = config.get_staging_max_age();

    let removed = store.clean_staging(staging_max_age).await?;
    let report = store.consolidate().await?;
    info!(
        staging_removed = removed,
        dropped_rows = report.dropped_rows,
        removed_files = report.removed_files,
        "Cache ready at {}",
        store.root().display()
    );

    let fetcher = config.create_fetcher()?;
    if config.get_fetcher_update_on_startup() {
        let fetcher = fetcher.clone();
        tokio::spawn(async move { fetcher.self_update().await });
    }

    let coordinator = config.create_coordinator(store.clone(), fetcher);

    // ========== PHASE 3 : Bibliothèque ==========
    let library = Arc::new(Library::new(coordinator));
    let credentials = config.load_credentials()?;
    let catalog = config.create_catalog_source(credentials)?;
    info!(source = catalog.name(), "Loading library catalog...");

    let _refresh = library
        .clone()
        .spawn_refresh(catalog, config.get_refresh_interval());
    let _follow = library.clone().follow_acquisitions();
    let _cleanup = spawn_staging_cleanup(store, staging_max_age);

    let history = Arc::new(config.create_history());
    let sessions = Arc::new(SessionStore::new());

    // ========== PHASE 4 : Démarrage du serveur ==========
    server.init_lanmusic(library, history, sessions)?;

    info!("Starting HTTP server...");
    server.start().await?;

    let info = server.info();
    info!(
        "LanMusic is ready: http://{}:{}/stream/{{id}}",
        info.base_url, info.http_port
    );
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    Ok(())
}

fn spawn_staging_cleanup(store: Arc<CacheStore>, max_age: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STAGING_CLEANUP_PERIOD);
        // Le premier tick est immédiat et le nettoyage vient d'être fait
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.clean_staging(max_age).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Stale staging files removed"),
                Err(e) => warn!("Staging cleanup failed: {}", e),
            }
        }
    })
}
