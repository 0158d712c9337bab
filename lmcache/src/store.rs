//! Cache Store : artefacts audio adressés par identifiant de piste
//!
//! Organisation sur disque :
//!
//! ```text
//! <root>/cache.db                     métadonnées SQLite (une ligne par piste)
//! <root>/<dd>/<digest>.<ext>          artefacts, dd = 2 premiers caractères du SHA-256
//! <root>/.staging/                    sorties temporaires de l'outil de téléchargement
//! ```
//!
//! Un artefact n'est visible comme `Ready` qu'une fois complètement écrit,
//! synchronisé sur disque, renommé à sa place définitive et enregistré en
//! base. Le `rename` se fait toujours depuis `.staging/`, sur le même
//! système de fichiers, et est donc atomique pour les lecteurs.

use crate::db::{TrackRow, DB};
use crate::entry::{CacheEntry, CacheState};
use crate::error::{Result, StorageError};
use crate::eviction::{CacheLimits, EvictionPolicy, LruPolicy};
use crate::staging::StagingSlot;
use crate::track_id::TrackId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

const DB_FILE: &str = "cache.db";
const STAGING_DIR: &str = ".staging";

/// Résultat d'une consolidation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ConsolidateReport {
    /// Lignes `ready` dont l'artefact avait disparu
    pub dropped_rows: usize,
    /// Fichiers d'artefacts sans ligne `ready` correspondante
    pub removed_files: usize,
}

/// Statistiques globales du cache
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CacheStats {
    pub entries: usize,
    pub ready: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub limits: CacheLimits,
    pub policy: String,
}

/// Cache Store
///
/// Conçu pour être partagé derrière un `Arc<CacheStore>`. Les mutations
/// pour des identifiants différents peuvent être concurrentes ; pour un même
/// identifiant, elles sont sérialisées par le coordinateur.
pub struct CacheStore {
    root: PathBuf,
    staging: PathBuf,
    db: DB,
    limits: CacheLimits,
    policy: Arc<dyn EvictionPolicy>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("limits", &self.limits)
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl CacheStore {
    /// Ouvre un cache avec la politique LRU
    ///
    /// # Arguments
    ///
    /// * `root` - Répertoire racine du cache (créé si besoin)
    /// * `limits` - Limites appliquées après chaque `put`
    pub fn open(root: impl AsRef<Path>, limits: CacheLimits) -> Result<Self> {
        Self::with_policy(root, limits, Arc::new(LruPolicy))
    }

    /// Ouvre un cache avec une politique d'éviction personnalisée
    pub fn with_policy(
        root: impl AsRef<Path>,
        limits: CacheLimits,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(StorageError::io(&root))?;
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging).map_err(StorageError::io(&staging))?;
        let db = DB::init(&root.join(DB_FILE))?;

        info!(
            root = %root.display(),
            max_entries = limits.max_entries,
            max_bytes = limits.max_bytes,
            policy = policy.name(),
            "Cache store opened"
        );

        Ok(Self {
            root,
            staging,
            db,
            limits,
            policy,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Chemin relatif (à la racine) de l'artefact d'une piste
    fn relative_artifact_path(id: &TrackId, ext: &str) -> String {
        let digest = id.digest();
        format!("{}/{}.{}", &digest[..2], digest, ext)
    }

    /// Chemin absolu de l'artefact d'une piste pour une extension donnée
    pub fn artifact_path(&self, id: &TrackId, ext: &str) -> PathBuf {
        self.root.join(Self::relative_artifact_path(id, ext))
    }

    /// Réserve un emplacement temporaire pour télécharger une piste
    pub fn staging_slot(&self, id: &TrackId) -> StagingSlot {
        StagingSlot::new(&self.staging, id)
    }

    fn entry_from_row(&self, row: TrackRow) -> Result<CacheEntry> {
        let corrupt = |detail: String| StorageError::Corrupt {
            track: row.track_id.clone(),
            detail,
        };

        let id = TrackId::new(row.track_id.clone()).map_err(|e| corrupt(e.to_string()))?;
        let state = CacheState::from_db_str(&row.state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", row.state)))?;

        Ok(CacheEntry {
            id,
            state,
            path: row.file_name.as_ref().map(|f| self.root.join(f)),
            size_bytes: row.size_bytes.max(0) as u64,
            content_type: row.content_type.clone(),
            fetched_at: parse_time(row.fetched_at.as_deref()),
            last_error: row.last_error.clone(),
            failed_at: parse_time(row.failed_at.as_deref()),
            hits: row.hits.max(0) as u64,
            last_used: parse_time(row.last_used.as_deref()),
            metadata: row
                .metadata_json
                .as_deref()
                .and_then(|m| serde_json::from_str(m).ok()),
        })
    }

    /// Vérifie qu'un artefact existe, est non vide et a la taille enregistrée
    async fn artifact_is_valid(path: Option<&Path>, expected_size: u64) -> bool {
        match path {
            Some(p) => matches!(
                fs::metadata(p).await,
                Ok(m) if m.is_file() && m.len() > 0 && m.len() == expected_size
            ),
            None => false,
        }
    }

    /// Applique la validation disque : un `Ready` sans fichier valide devient `Missing`
    async fn validated(&self, mut entry: CacheEntry) -> CacheEntry {
        if entry.state == CacheState::Ready
            && !Self::artifact_is_valid(entry.path.as_deref(), entry.size_bytes).await
        {
            debug!(track = %entry.id, "Ready row without a valid artifact, reporting Missing");
            entry.state = CacheState::Missing;
            entry.path = None;
        }
        entry
    }

    /// Consulte l'état d'une piste, sans aucun effet de bord
    ///
    /// # Returns
    ///
    /// `None` si la piste est inconnue du cache. Une entrée `Ready` dont le
    /// fichier a disparu ou est vide est rapportée `Missing`.
    pub async fn lookup(&self, id: &TrackId) -> Result<Option<CacheEntry>> {
        match self.db.get(id.as_str())? {
            Some(row) => {
                let entry = self.entry_from_row(row)?;
                Ok(Some(self.validated(entry).await))
            }
            None => Ok(None),
        }
    }

    /// Stocke un artefact et le marque `Ready`
    pub async fn put(&self, id: &TrackId, file: &Path, content_type: &str) -> Result<CacheEntry> {
        self.put_with_metadata(id, file, content_type, None).await
    }

    /// Stocke un artefact avec des métadonnées JSON optionnelles
    ///
    /// # Workflow
    ///
    /// 1. Vérifie que le fichier existe et n'est pas vide
    /// 2. Le copie dans `.staging/` s'il se trouve ailleurs (l'original n'est pas touché)
    /// 3. `fsync` puis `rename` vers `<dd>/<digest>.<ext>`
    /// 4. Enregistre la ligne `ready` en base
    /// 5. Applique la politique d'éviction en protégeant cette piste
    ///
    /// En cas d'échec aux étapes 2 à 4, le nouveau fichier est supprimé et
    /// l'état précédent est restauré.
    pub async fn put_with_metadata(
        &self,
        id: &TrackId,
        file: &Path,
        content_type: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<CacheEntry> {
        let meta = fs::metadata(file).await.map_err(StorageError::io(file))?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(StorageError::EmptyArtifact(file.to_path_buf()));
        }
        let size = meta.len();
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "bin".to_string());

        // Le slot nettoie la copie si on sort en erreur avant le rename.
        let mut copy_slot = None;
        let staged = if file.starts_with(&self.staging) {
            file.to_path_buf()
        } else {
            let slot = self.staging_slot(id);
            let staged = slot.stem().with_extension(&ext);
            fs::copy(file, &staged).await.map_err(StorageError::io(&staged))?;
            copy_slot = Some(slot);
            staged
        };

        sync_file(&staged).await?;

        let relative = Self::relative_artifact_path(id, &ext);
        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(StorageError::io(parent))?;
        }

        let previous = self.db.get(id.as_str())?;

        // Un artefact déjà présent à cette place est mis de côté jusqu'au commit.
        let backup = if fs::try_exists(&target).await.unwrap_or(false) {
            let backup = self.staging_slot(id).stem().with_extension("bak");
            fs::rename(&target, &backup).await.map_err(StorageError::io(&target))?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staged, &target).await {
            restore_backup(backup.as_deref(), &target).await;
            return Err(StorageError::Io { path: target, source: e });
        }

        let metadata_json = metadata.map(|m| m.to_string());
        if let Err(e) = self.db.upsert_ready(
            id.as_str(),
            &id.digest(),
            &relative,
            size,
            content_type,
            metadata_json.as_deref(),
        ) {
            let _ = fs::remove_file(&target).await;
            restore_backup(backup.as_deref(), &target).await;
            return Err(e.into());
        }

        if let Some(backup) = backup {
            let _ = fs::remove_file(&backup).await;
        }
        if let Some(old) = previous.and_then(|row| row.file_name) {
            if old != relative {
                let _ = fs::remove_file(self.root.join(old)).await;
            }
        }
        drop(copy_slot);

        info!(track = %id, size, content_type, file = %relative, "Artifact stored");

        if let Err(e) = self.enforce_limits(Some(id)).await {
            warn!(track = %id, "Eviction after put failed: {}", e);
        }

        self.lookup(id).await?.ok_or_else(|| StorageError::Corrupt {
            track: id.to_string(),
            detail: "row vanished after put".to_string(),
        })
    }

    /// Enregistre l'échec d'un téléchargement
    ///
    /// Un artefact `Ready` encore valide n'est jamais écrasé par un échec
    /// ultérieur : l'entrée existante est retournée telle quelle.
    pub async fn mark_failed(&self, id: &TrackId, error: &str) -> Result<CacheEntry> {
        if let Some(row) = self.db.get(id.as_str())? {
            let stale_file = row.file_name.clone();
            let entry = self.validated(self.entry_from_row(row)?).await;
            if entry.is_ready() {
                warn!(track = %id, error, "Fetch failed but a ready artifact exists, keeping it");
                return Ok(entry);
            }
            if let Some(stale) = stale_file {
                let _ = fs::remove_file(self.root.join(stale)).await;
            }
        }

        self.db.upsert_failed(id.as_str(), &id.digest(), error)?;
        warn!(track = %id, error, "Track marked as failed");

        self.lookup(id).await?.ok_or_else(|| StorageError::Corrupt {
            track: id.to_string(),
            detail: "row vanished after mark_failed".to_string(),
        })
    }

    /// Supprime l'artefact et les métadonnées d'une piste
    ///
    /// Opération idempotente.
    ///
    /// # Returns
    ///
    /// `true` si quelque chose a été supprimé, `false` si la piste était absente
    pub async fn evict(&self, id: &TrackId) -> Result<bool> {
        // La ligne part d'abord : aucun lecteur ne voit un Ready sans fichier.
        let row = self.db.get(id.as_str())?;
        let mut removed = self.db.delete(id.as_str())? > 0;

        if let Some(file) = row.and_then(|r| r.file_name) {
            let path = self.root.join(file);
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io { path, source: e }),
            }
        }

        removed |= self.remove_digest_files(&id.digest()).await? > 0;

        if removed {
            info!(track = %id, "Track evicted from cache");
        }
        Ok(removed)
    }

    /// Supprime tous les fichiers `<digest>.*` du répertoire de shard
    async fn remove_digest_files(&self, digest: &str) -> Result<usize> {
        let shard = self.root.join(&digest[..2]);
        let mut entries = match fs::read_dir(&shard).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::Io { path: shard, source: e }),
        };

        let prefix = format!("{}.", digest);
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::io(&shard))? {
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Enregistre une lecture (compteur et date, utilisés par la politique LRU)
    pub async fn touch(&self, id: &TrackId) -> Result<bool> {
        Ok(self.db.update_hit(id.as_str())?)
    }

    /// Liste toutes les entrées connues, validées contre le disque
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for row in self.db.get_all()? {
            match self.entry_from_row(row) {
                Ok(entry) => entries.push(self.validated(entry).await),
                Err(e) => warn!("Skipping cache row: {}", e),
            }
        }
        Ok(entries)
    }

    /// Entrées `ready` telles qu'enregistrées, les moins récentes d'abord
    fn ready_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self
            .db
            .get_ready()?
            .into_iter()
            .filter_map(|row| self.entry_from_row(row).ok())
            .collect())
    }

    /// Applique la politique d'éviction
    ///
    /// # Arguments
    ///
    /// * `protect` - Piste à ne jamais évincer (en général celle qui vient d'être stockée)
    ///
    /// # Returns
    ///
    /// Le nombre de pistes évincées
    pub async fn enforce_limits(&self, protect: Option<&TrackId>) -> Result<usize> {
        if self.limits.is_unlimited() {
            return Ok(0);
        }

        let ready = self.ready_entries()?;
        let victims = self.policy.select_victims(&ready, &self.limits, protect);

        let mut removed = 0;
        for victim in victims {
            match self.evict(&victim).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(track = %victim, "Error evicting track: {}", e),
            }
        }

        if removed > 0 {
            info!(
                removed,
                policy = self.policy.name(),
                "Eviction: removed {} tracks (cache size: {} -> {})",
                removed,
                ready.len(),
                ready.len() - removed
            );
        }
        Ok(removed)
    }

    /// Répertoires de shard (`<root>/<dd>`)
    async fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await.map_err(StorageError::io(&self.root))?;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::io(&self.root))? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.len() == 2
                && name.chars().all(|c| c.is_ascii_hexdigit())
                && entry.path().is_dir()
            {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// Consolide le cache
    ///
    /// Supprime les lignes `ready` dont l'artefact a disparu et les fichiers
    /// d'artefacts qui ne correspondent à aucune ligne `ready`.
    pub async fn consolidate(&self) -> Result<ConsolidateReport> {
        let mut report = ConsolidateReport::default();

        for row in self.db.get_all()? {
            let track = row.track_id.clone();
            let keep = match self.entry_from_row(row) {
                Ok(entry) if entry.is_ready() => {
                    Self::artifact_is_valid(entry.path.as_deref(), entry.size_bytes).await
                }
                Ok(_) => true,
                Err(e) => {
                    warn!("Dropping corrupt cache row: {}", e);
                    false
                }
            };
            if !keep {
                self.db.delete(&track)?;
                report.dropped_rows += 1;
            }
        }

        for shard in self.shard_dirs().await? {
            let shard_name = shard
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut files = fs::read_dir(&shard).await.map_err(StorageError::io(&shard))?;
            while let Some(file) = files.next_entry().await.map_err(StorageError::io(&shard))? {
                let name = file.file_name().to_string_lossy().into_owned();
                let digest = name.split('.').next().unwrap_or_default();
                let relative = format!("{}/{}", shard_name, name);

                let referenced = match self.db.get_by_digest(digest)? {
                    Some(row) => row.state == CacheState::Ready.as_db_str() && row.file_name.as_deref() == Some(relative.as_str()),
                    None => false,
                };
                if !referenced {
                    match fs::remove_file(file.path()).await {
                        Ok(()) => report.removed_files += 1,
                        Err(e) => warn!(file = %relative, "Unable to remove orphan file: {}", e),
                    }
                }
            }
        }

        if report != ConsolidateReport::default() {
            info!(
                dropped_rows = report.dropped_rows,
                removed_files = report.removed_files,
                "Cache consolidated"
            );
        }
        Ok(report)
    }

    /// Supprime les fichiers de `.staging/` plus vieux que `max_age`
    ///
    /// # Returns
    ///
    /// Le nombre de fichiers supprimés
    pub async fn clean_staging(&self, max_age: Duration) -> Result<usize> {
        let mut entries = fs::read_dir(&self.staging)
            .await
            .map_err(StorageError::io(&self.staging))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StorageError::io(&self.staging))?
        {
            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified.elapsed().map(|age| age >= max_age).unwrap_or(false),
                Err(_) => false,
            };
            if stale && fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Removed stale staging files");
        }
        Ok(removed)
    }

    /// Supprime tous les artefacts, les fichiers temporaires et les métadonnées
    pub async fn purge(&self) -> Result<()> {
        for shard in self.shard_dirs().await? {
            fs::remove_dir_all(&shard).await.map_err(StorageError::io(&shard))?;
        }
        self.clean_staging(Duration::ZERO).await?;
        self.db.purge()?;
        info!(root = %self.root.display(), "Cache purged");
        Ok(())
    }

    /// Statistiques globales
    pub fn stats(&self) -> Result<CacheStats> {
        let rows = self.db.get_all()?;
        let ready: Vec<&TrackRow> = rows.iter().filter(|r| r.state == CacheState::Ready.as_db_str()).collect();
        Ok(CacheStats {
            entries: rows.len(),
            ready: ready.len(),
            failed: rows.iter().filter(|r| r.state == CacheState::Failed.as_db_str()).count(),
            total_bytes: ready.iter().map(|r| r.size_bytes.max(0) as u64).sum(),
            limits: self.limits,
            policy: self.policy.name().to_string(),
        })
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

async fn sync_file(path: &Path) -> Result<()> {
    let file = fs::File::open(path).await.map_err(StorageError::io(path))?;
    file.sync_all().await.map_err(StorageError::io(path))
}

async fn restore_backup(backup: Option<&Path>, target: &Path) {
    if let Some(backup) = backup {
        if let Err(e) = fs::rename(backup, target).await {
            warn!(file = %target.display(), "Unable to restore previous artifact: {}", e);
        }
    }
}
