//! Gestion des erreurs de la Library Index

use lmacquire::AcquireError;
use lmcache::TrackId;
use std::path::PathBuf;
use thiserror::Error;

/// Type Result personnalisé pour lmlibrary
pub type Result<T, E = LibraryError> = std::result::Result<T, E>;

/// Erreurs possibles de la Library Index et des sources de catalogue
#[derive(Error, Debug)]
pub enum LibraryError {
    /// Identifiant inconnu du catalogue
    #[error("Unknown track: {0}")]
    NotFound(TrackId),

    /// Le catalogue distant a répondu par une erreur HTTP
    #[error("Catalog {source_name} answered {status}: {message}")]
    CatalogStatus {
        source_name: String,
        status: u16,
        message: String,
    },

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Document de catalogue illisible
    #[error("Invalid catalog document {origin}: {detail}")]
    Parse { origin: String, detail: String },

    /// Erreur d'E/S sur un fichier de catalogue ou de credentials
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fichier de credentials inutilisable
    #[error("Invalid session credentials: {0}")]
    Credentials(String),

    /// Erreur remontée par le coordinateur
    #[error(transparent)]
    Acquire(#[from] AcquireError),
}

impl LibraryError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| LibraryError::Io { path, source }
    }

    pub(crate) fn parse(origin: impl Into<String>, detail: impl ToString) -> Self {
        LibraryError::Parse {
            origin: origin.into(),
            detail: detail.to_string(),
        }
    }

    /// Vérifie si l'erreur signale un identifiant inconnu
    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound(_))
    }
}
