use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Métadonnées d'une piste, telles que rapportées par l'outil de téléchargement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_secs: Option<f64>,
}

impl TrackMetadata {
    /// Lit le JSON imprimé par `yt-dlp --print-json`.
    ///
    /// L'artiste se rabat sur `uploader`, puis `channel`, puis `"Unknown"`.
    pub fn from_ytdlp_json(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let artist = text("artist")
            .or_else(|| text("uploader"))
            .or_else(|| text("channel"))
            .unwrap_or_else(|| "Unknown".to_string());

        TrackMetadata {
            title: text("title"),
            artist: Some(artist),
            thumbnail: text("thumbnail"),
            duration_secs: value.get("duration").and_then(Value::as_f64),
        }
    }

    /// Cherche, en partant de la fin, la dernière ligne JSON objet de `stdout`.
    ///
    /// Une sortie illisible n'est pas une erreur : on retourne `None`.
    pub fn from_stdout(stdout: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(stdout);
        text.lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(Value::is_object)
            .map(|value| Self::from_ytdlp_json(&value))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
