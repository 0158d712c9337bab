//! Erreurs du Cache Store

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Erreur de validation d'un identifiant de piste
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackIdError {
    #[error("track identifier is empty")]
    Empty,

    #[error("track identifier is too long ({0} bytes, max {max})", max = crate::track_id::MAX_TRACK_ID_LEN)]
    TooLong(usize),

    #[error("track identifier contains a control character")]
    ControlCharacter,
}

/// Erreurs de stockage (disque plein, permissions, base corrompue...)
///
/// Ces erreurs sont fatales pour la requête en cours mais ne corrompent
/// jamais le contenu existant du cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("artifact {} is empty", .0.display())]
    EmptyArtifact(PathBuf),

    #[error("corrupt cache row for {track}: {detail}")]
    Corrupt { track: String, detail: String },

    #[error(transparent)]
    InvalidTrackId(#[from] TrackIdError),
}

impl StorageError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
