use crate::track_id::TrackId;
use std::fs;
use std::path::{Path, PathBuf};

/// Emplacement temporaire pour un téléchargement, dans `<root>/.staging/`.
///
/// L'outil externe écrit `<stem>.<ext>` ; le `put` du store déplace ensuite
/// ce fichier par un simple `rename` (même système de fichiers). À la
/// destruction du slot, tout fichier `<stem>.*` encore présent est supprimé,
/// ce qui nettoie les sorties partielles d'un téléchargement annulé ou échoué.
#[derive(Debug)]
pub struct StagingSlot {
    dir: PathBuf,
    name: String,
}

impl StagingSlot {
    pub(crate) fn new(dir: &Path, id: &TrackId) -> Self {
        let digest = id.digest();
        let name = format!("{}-{}", &digest[..16], uuid::Uuid::new_v4().simple());
        Self {
            dir: dir.to_path_buf(),
            name,
        }
    }

    /// Chemin sans extension à donner à l'outil de téléchargement
    pub fn stem(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Fichiers `<stem>.*` actuellement présents
    pub fn files(&self) -> Vec<PathBuf> {
        let prefix = format!("{}.", self.name);
        match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                .map(|e| e.path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Supprime les fichiers `<stem>.*` restants ; retourne leur nombre
    pub fn cleanup(&self) -> usize {
        let mut removed = 0;
        for path in self.files() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = %path.display(), "Unable to remove staging file: {}", e),
            }
        }
        removed
    }
}

// Nettoyage synchrone, même sur un thread du runtime : le slot ne contient
// que les quelques fichiers d'un téléchargement, et le staging doit être
// vide dès que la tâche qui le possédait se termine.
impl Drop for StagingSlot {
    fn drop(&mut self) {
        let removed = self.cleanup();
        if removed > 0 {
            tracing::debug!(slot = %self.name, removed, "Removed leftover staging files");
        }
    }
}
