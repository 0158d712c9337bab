//! Erreurs du Fetcher Adapter
//!
//! Toute défaillance du sous-processus (code de sortie non nul, binaire
//! absent, sortie vide, dépassement de délai) est normalisée ici ; aucune
//! erreur d'E/S brute ne sort de ce crate.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Nature d'un échec de téléchargement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum FetchErrorKind {
    /// L'outil n'a pas terminé dans le délai imparti
    Timeout,
    /// Lancement impossible, code de sortie non nul, sortie illisible
    ProcessFailure,
    /// Aucun fichier produit, ou fichier vide
    EmptyOutput,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ProcessFailure => "process failure",
            FetchErrorKind::EmptyOutput => "empty output",
        })
    }
}

/// Échec typé d'un téléchargement
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {detail}")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub detail: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, detail)
    }

    pub fn process_failure(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::ProcessFailure, detail)
    }

    pub fn empty_output(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::EmptyOutput, detail)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FetchErrorKind::Timeout
    }
}
