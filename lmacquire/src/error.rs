use lmfetch::FetchError;
use std::time::Duration;
use thiserror::Error;

/// Issue négative d'une acquisition
///
/// `Clone` : la même issue est diffusée à tous les appelants en attente.
/// Ne contient que des données normalisées (jamais d'erreur d'E/S brute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// Le téléchargement a échoué
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    /// Un échec récent est encore dans sa fenêtre d'attente
    #[error("last fetch failed ({last}), retry allowed in {}s", retry_in.as_secs())]
    BackingOff { last: FetchError, retry_in: Duration },

    /// Le Cache Store n'a pas pu lire ou écrire
    #[error("storage error: {0}")]
    Storage(String),

    /// Tous les intéressés sont partis avant la fin du téléchargement
    #[error("acquisition cancelled")]
    Cancelled,
}

impl AcquireError {
    /// Erreur de téléchargement sous-jacente (échec direct ou attente après échec)
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            AcquireError::Fetch(e) => Some(e),
            AcquireError::BackingOff { last, .. } => Some(last),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.fetch_error().is_some_and(FetchError::is_timeout)
    }
}

impl From<lmcache::StorageError> for AcquireError {
    fn from(e: lmcache::StorageError) -> Self {
        AcquireError::Storage(e.to_string())
    }
}
