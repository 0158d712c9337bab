//! Identifiant stable d'une piste du catalogue

use crate::error::TrackIdError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Longueur maximale (en octets) d'un identifiant
pub const MAX_TRACK_ID_LEN: usize = 512;

/// Identifiant opaque d'une piste, tel qu'attribué par le catalogue externe.
///
/// C'est la seule clé utilisée pour le cache et la déduplication des
/// téléchargements. La valeur est validée à la construction : non vide,
/// au plus [`MAX_TRACK_ID_LEN`] octets, sans caractère de contrôle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[cfg_attr(feature = "openapi", derive(ToSchema), schema(value_type = String, example = "dQw4w9WgXcQ"))]
pub struct TrackId(String);

impl TrackId {
    pub fn new(value: impl Into<String>) -> Result<Self, TrackIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TrackIdError::Empty);
        }
        if value.len() > MAX_TRACK_ID_LEN {
            return Err(TrackIdError::TooLong(value.len()));
        }
        if value.chars().any(char::is_control) {
            return Err(TrackIdError::ControlCharacter);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empreinte SHA-256 (hex) de l'identifiant, utilisée pour le nom des fichiers.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    /// Sous-répertoire de l'artefact (deux premiers caractères de l'empreinte).
    pub fn shard(&self) -> String {
        self.digest()[..2].to_string()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TrackId {
    type Err = TrackIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TrackId {
    type Error = TrackIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TrackId {
    type Error = TrackIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TrackId> for String {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert_eq!(TrackId::new(""), Err(TrackIdError::Empty));
        assert_eq!(TrackId::new("a\nb"), Err(TrackIdError::ControlCharacter));
        assert_eq!(
            TrackId::new("x".repeat(MAX_TRACK_ID_LEN + 1)),
            Err(TrackIdError::TooLong(MAX_TRACK_ID_LEN + 1))
        );
        assert!(TrackId::new("x".repeat(MAX_TRACK_ID_LEN)).is_ok());
        assert!(TrackId::new("https://music.example/watch?v=abc").is_ok());
    }

    #[test]
    fn test_digest_is_stable() {
        let id = TrackId::new("abc").unwrap();
        assert_eq!(
            id.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(id.shard(), "ba");
    }

    #[test]
    fn test_serde_validates() {
        let id: TrackId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_str::<TrackId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
