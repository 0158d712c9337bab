//! Extension pour configurer la Library Index depuis lmconfig

use crate::catalog::{CatalogSource, FileCatalog, HttpCatalog};
use crate::credentials::SessionCredentials;
use crate::history::{History, DEFAULT_HISTORY_SIZE};
use anyhow::Result;
use lmconfig::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CATALOG_FILE: &str = "library.yaml";
const DEFAULT_CREDENTIALS_FILE: &str = "id.txt";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

pub trait LibraryConfigExt {
    /// Fichier de catalogue local (relatif au répertoire de configuration)
    fn get_catalog_file(&self) -> PathBuf;

    /// URL du catalogue distant, si configurée
    fn get_catalog_url(&self) -> Option<String>;

    /// Fichier des credentials de session
    fn get_credentials_file(&self) -> PathBuf;

    /// Période de resynchronisation du catalogue
    fn get_refresh_interval(&self) -> Duration;

    fn get_history_size(&self) -> usize;

    /// Charge les credentials ; un fichier absent donne des credentials vides
    fn load_credentials(&self) -> Result<Arc<SessionCredentials>>;

    /// Source HTTP si `library.catalog_url` est renseignée, fichier sinon
    fn create_catalog_source(&self, credentials: Arc<SessionCredentials>) -> Result<Arc<dyn CatalogSource>>;

    fn create_history(&self) -> History;
}

impl LibraryConfigExt for Config {
    fn get_catalog_file(&self) -> PathBuf {
        self.resolve_path(&self.get_string(&["library", "catalog_file"], DEFAULT_CATALOG_FILE))
    }

    fn get_catalog_url(&self) -> Option<String> {
        let url = self.get_string(&["library", "catalog_url"], "");
        let url = url.trim();
        (!url.is_empty()).then(|| url.to_string())
    }

    fn get_credentials_file(&self) -> PathBuf {
        self.resolve_path(&self.get_string(
            &["library", "credentials_file"],
            DEFAULT_CREDENTIALS_FILE,
        ))
    }

    fn get_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.get_u64(
            &["library", "refresh_interval_secs"],
            DEFAULT_REFRESH_INTERVAL_SECS,
        ))
    }

    fn get_history_size(&self) -> usize {
        self.get_u64(&["library", "history_size"], DEFAULT_HISTORY_SIZE as u64) as usize
    }

    fn load_credentials(&self) -> Result<Arc<SessionCredentials>> {
        let path = self.get_credentials_file();
        if !path.exists() {
            warn!(
                "No credentials file at {}, catalog requests are anonymous",
                path.display()
            );
            return Ok(Arc::new(SessionCredentials::empty()));
        }
        Ok(Arc::new(SessionCredentials::from_file(&path)?))
    }

    fn create_catalog_source(&self, credentials: Arc<SessionCredentials>) -> Result<Arc<dyn CatalogSource>> {
        match self.get_catalog_url() {
            Some(url) => {
                info!("Using remote catalog {}", url);
                Ok(Arc::new(HttpCatalog::new(url, credentials)?))
            }
            None => {
                let path = self.get_catalog_file();
                info!("Using catalog file {}", path.display());
                Ok(Arc::new(FileCatalog::new(path)))
            }
        }
    }

    fn create_history(&self) -> History {
        History::new(self.get_history_size())
    }
}
