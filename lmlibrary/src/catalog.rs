//! Sources de catalogue
//!
//! Une [`CatalogSource`] fournit la liste des [`LibraryRecord`] connus. Le
//! document attendu est soit une liste de fiches, soit un objet
//! `{ "tracks": [...] }`, en YAML ou en JSON.

use crate::credentials::SessionCredentials;
use crate::error::{LibraryError, Result};
use crate::record::LibraryRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fournisseur de fiches de catalogue
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Nom court, pour les journaux
    fn name(&self) -> &str;

    /// Récupère l'ensemble des fiches du catalogue
    async fn fetch_records(&self) -> Result<Vec<LibraryRecord>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<LibraryRecord>),
    Wrapped { tracks: Vec<LibraryRecord> },
}

impl CatalogDocument {
    fn into_records(self) -> Vec<LibraryRecord> {
        let mut records = match self {
            CatalogDocument::List(records) => records,
            CatalogDocument::Wrapped { tracks } => tracks,
        };
        records.iter_mut().for_each(LibraryRecord::normalize);
        records
    }
}

/// Décode un document JSON
pub fn parse_json(origin: &str, text: &str) -> Result<Vec<LibraryRecord>> {
    serde_json::from_str::<CatalogDocument>(text)
        .map(CatalogDocument::into_records)
        .map_err(|e| LibraryError::parse(origin, e))
}

/// Décode un document YAML (un document vide est un catalogue vide)
pub fn parse_yaml(origin: &str, text: &str) -> Result<Vec<LibraryRecord>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str::<CatalogDocument>(text)
        .map(CatalogDocument::into_records)
        .map_err(|e| LibraryError::parse(origin, e))
}

/// Catalogue lu depuis un fichier local (`.json`, sinon YAML)
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_records(&self) -> Result<Vec<LibraryRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Catalog file {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(LibraryError::io(&self.path)(e)),
        };

        let origin = self.path.display().to_string();
        if self.is_json() {
            parse_json(&origin, &text)
        } else {
            parse_yaml(&origin, &text)
        }
    }
}

/// Catalogue distant : `GET <url>` avec les credentials de session
pub struct HttpCatalog {
    client: Client,
    url: String,
    credentials: Arc<SessionCredentials>,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, credentials: Arc<SessionCredentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("LanMusic/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalog")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_records(&self) -> Result<Vec<LibraryRecord>> {
        debug!("GET {}", self.url);

        let request = self
            .credentials
            .apply(self.client.get(&self.url))
            .header(reqwest::header::ACCEPT, "application/json");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Catalog error ({}): {}", status.as_u16(), message);
            return Err(LibraryError::CatalogStatus {
                source_name: self.name().to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        parse_json(&self.url, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_and_wrapped() {
        let list = parse_json("inline", r#"[{"id": "a", "title": "A"}, {"id": "b"}]"#).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].title, "b");

        let wrapped = parse_yaml(
            "inline",
            "tracks:\n  - id: a\n    title: A\n    artist: X & Y\n",
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].artists, vec!["X", "Y"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_json("inline", "{not json"),
            Err(LibraryError::Parse { .. })
        ));
        assert!(parse_yaml("inline", "").unwrap().is_empty());
    }
}
