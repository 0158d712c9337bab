//! Fiche de catalogue d'une piste

use lmcache::TrackId;
use lmfetch::TrackMetadata;
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Métadonnées de catalogue d'une piste
///
/// Le cycle de vie d'une fiche est indépendant de celui de l'artefact : une
/// piste peut être connue sans être en cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LibraryRecord {
    /// Identifiant de la piste dans le catalogue externe
    pub id: TrackId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Artistes individuels (découpés depuis `artist` s'ils sont absents)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// URL source à passer au fetcher, si différente de l'identifiant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl LibraryRecord {
    /// Crée une fiche minimale
    pub fn new(id: TrackId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            artist: None,
            artists: Vec::new(),
            album: None,
            duration_secs: None,
            thumbnail: None,
            source_url: None,
        }
    }

    /// Crée une fiche à partir des métadonnées rapportées par le fetcher
    pub fn from_metadata(id: TrackId, metadata: &TrackMetadata) -> Self {
        let mut record = Self::new(id, "");
        record.merge_metadata(metadata);
        record
    }

    /// Référence de téléchargement : l'URL source, sinon l'identifiant
    pub fn reference(&self) -> &str {
        self.source_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.id.as_str())
    }

    /// Complète les champs vides avec les métadonnées du fetcher
    ///
    /// Les valeurs déjà présentes (catalogue, saisie manuelle) ne sont jamais écrasées.
    pub fn merge_metadata(&mut self, metadata: &TrackMetadata) {
        if self.title.trim().is_empty() {
            if let Some(title) = &metadata.title {
                self.title = title.clone();
            }
        }
        if self.artist.is_none() {
            self.artist = metadata.artist.clone();
        }
        if self.thumbnail.is_none() {
            self.thumbnail = metadata.thumbnail.clone();
        }
        if self.duration_secs.is_none() {
            self.duration_secs = metadata.duration_secs;
        }
        self.normalize();
    }

    /// Remplit les champs dérivés : titre par défaut, liste des artistes
    pub fn normalize(&mut self) {
        if self.title.trim().is_empty() {
            self.title = self.id.to_string();
        }
        if self.artists.is_empty() {
            if let Some(artist) = &self.artist {
                self.artists = split_artists(artist);
            }
        }
    }

    /// Complète les champs vides avec ceux d'une autre fiche de la même piste
    pub(crate) fn fill_from(&mut self, other: &LibraryRecord) {
        if self.title.trim().is_empty() || self.title == self.id.as_str() {
            if !other.title.trim().is_empty() {
                self.title = other.title.clone();
            }
        }
        if self.artist.is_none() {
            self.artist = other.artist.clone();
        }
        if self.artists.is_empty() {
            self.artists = other.artists.clone();
        }
        if self.album.is_none() {
            self.album = other.album.clone();
        }
        if self.duration_secs.is_none() {
            self.duration_secs = other.duration_secs;
        }
        if self.thumbnail.is_none() {
            self.thumbnail = other.thumbnail.clone();
        }
        if self.source_url.is_none() {
            self.source_url = other.source_url.clone();
        }
    }
}

impl LibraryRecord {
    /// Artiste principal : le premier artiste crédité
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists
            .first()
            .map(String::as_str)
            .or(self.artist.as_deref())
            .map(str::trim)
            .filter(|artist| !artist.is_empty())
    }

    /// Vrai si chaque mot de `query` apparaît dans le titre, un artiste ou
    /// l'album, sans tenir compte de la casse
    ///
    /// Une requête vide correspond à toutes les fiches.
    pub fn matches(&self, query: &str) -> bool {
        let haystack = [
            Some(self.title.as_str()),
            self.artist.as_deref(),
            self.album.as_deref(),
        ]
        .into_iter()
        .flatten()
        .chain(self.artists.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

        query
            .split_whitespace()
            .all(|term| haystack.contains(&term.to_lowercase()))
    }
}

/// Découpe « A & B, C » en `["A", "B", "C"]`
pub fn split_artists(artist: &str) -> Vec<String> {
    artist
        .split(['&', ','])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
