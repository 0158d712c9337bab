use crate::error::FetchError;
use crate::metadata::TrackMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Fichier audio produit par un téléchargement réussi
///
/// Le fichier reste dans le répertoire temporaire de l'appelant, qui en
/// devient propriétaire (il le déplace dans le cache ou le supprime).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub content_type: String,
    pub size_bytes: u64,
    pub metadata: Option<TrackMetadata>,
}

/// Source de pistes audio
///
/// `reference` est ce que l'outil sait résoudre (identifiant ou URL source),
/// `output_stem` un chemin sans extension : l'implémentation écrit
/// `<output_stem>.<ext>`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, FetchError>;
}

/// Type MIME d'un fichier audio d'après son extension
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "opus" | "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for_extension("MP3"), "audio/mpeg");
        assert_eq!(content_type_for_extension("m4a"), "audio/mp4");
        assert_eq!(content_type_for_extension("opus"), "audio/ogg");
        assert_eq!(content_type_for_extension("xyz"), "application/octet-stream");
    }
}
