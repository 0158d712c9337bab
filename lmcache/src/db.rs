//! Module de gestion de la base de données SQLite du cache
//!
//! Une ligne par piste (`track_id` est la clé primaire), ce qui garantit
//! qu'il n'existe jamais plus d'une entrée de cache par identifiant.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TABLE: &str = "tracks";

const COLUMNS: &str = "track_id, digest, state, file_name, size_bytes, content_type, \
                       fetched_at, last_error, failed_at, hits, last_used, metadata_json";

/// Ligne brute de la table `tracks`
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRow {
    pub track_id: String,
    pub digest: String,
    /// `"ready"` ou `"failed"`
    pub state: String,
    /// Chemin de l'artefact relatif à la racine du cache (`ab/abcd….mp3`)
    pub file_name: Option<String>,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub fetched_at: Option<String>,
    pub last_error: Option<String>,
    pub failed_at: Option<String>,
    pub hits: i64,
    pub last_used: Option<String>,
    pub metadata_json: Option<String>,
}

impl TrackRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TrackRow {
            track_id: row.get(0)?,
            digest: row.get(1)?,
            state: row.get(2)?,
            file_name: row.get(3)?,
            size_bytes: row.get(4)?,
            content_type: row.get(5)?,
            fetched_at: row.get(6)?,
            last_error: row.get(7)?,
            failed_at: row.get(8)?,
            hits: row.get(9)?,
            last_used: row.get(10)?,
            metadata_json: row.get(11)?,
        })
    }
}

/// Horodatage RFC3339 à largeur fixe (l'ordre lexicographique suit l'ordre chronologique)
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Base de données SQLite des métadonnées du cache
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
}

impl DB {
    /// Ouvre (ou crée) la base et son schéma
    pub fn init(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                track_id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                state TEXT NOT NULL,
                file_name TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                content_type TEXT,
                fetched_at TEXT,
                last_error TEXT,
                failed_at TEXT,
                hits INTEGER NOT NULL DEFAULT 0,
                last_used TEXT,
                metadata_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_{TABLE}_digest ON {TABLE} (digest);
            CREATE INDEX IF NOT EXISTS idx_{TABLE}_lru ON {TABLE} (state, last_used ASC, hits ASC);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Une connexion reste utilisable après un panic d'un autre thread.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Récupère la ligne d'une piste
    pub fn get(&self, track_id: &str) -> rusqlite::Result<Option<TrackRow>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM {TABLE} WHERE track_id = ?1"),
            [track_id],
            TrackRow::from_row,
        )
        .optional()
    }

    /// Récupère la ligne correspondant à une empreinte d'identifiant
    pub fn get_by_digest(&self, digest: &str) -> rusqlite::Result<Option<TrackRow>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM {TABLE} WHERE digest = ?1"),
            [digest],
            TrackRow::from_row,
        )
        .optional()
    }

    /// Enregistre une piste `ready`
    ///
    /// Remplace une éventuelle ligne `failed` ; les statistiques d'accès
    /// (`hits`, `last_used`) d'une ligne existante sont conservées.
    pub fn upsert_ready(
        &self,
        track_id: &str,
        digest: &str,
        file_name: &str,
        size_bytes: u64,
        content_type: &str,
        metadata_json: Option<&str>,
    ) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} (track_id, digest, state, file_name, size_bytes, content_type,
                                      fetched_at, last_error, failed_at, hits, last_used, metadata_json)
                 VALUES (?1, ?2, 'ready', ?3, ?4, ?5, ?6, NULL, NULL, 0, NULL, ?7)
                 ON CONFLICT(track_id) DO UPDATE SET
                     state = 'ready',
                     file_name = excluded.file_name,
                     size_bytes = excluded.size_bytes,
                     content_type = excluded.content_type,
                     fetched_at = excluded.fetched_at,
                     last_error = NULL,
                     failed_at = NULL,
                     metadata_json = COALESCE(excluded.metadata_json, {TABLE}.metadata_json)"
            ),
            params![
                track_id,
                digest,
                file_name,
                size_bytes as i64,
                content_type,
                now_rfc3339(),
                metadata_json
            ],
        )?;
        Ok(())
    }

    /// Enregistre un échec ; l'artefact éventuel n'est plus référencé
    pub fn upsert_failed(&self, track_id: &str, digest: &str, error: &str) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} (track_id, digest, state, last_error, failed_at)
                 VALUES (?1, ?2, 'failed', ?3, ?4)
                 ON CONFLICT(track_id) DO UPDATE SET
                     state = 'failed',
                     file_name = NULL,
                     size_bytes = 0,
                     content_type = NULL,
                     last_error = excluded.last_error,
                     failed_at = excluded.failed_at"
            ),
            params![track_id, digest, error, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Incrémente le compteur de lectures et met à jour `last_used`
    ///
    /// # Returns
    ///
    /// `true` si une ligne `ready` a été mise à jour
    pub fn update_hit(&self, track_id: &str) -> rusqlite::Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            &format!(
                "UPDATE {TABLE} SET hits = hits + 1, last_used = ?1
                 WHERE track_id = ?2 AND state = 'ready'"
            ),
            params![now_rfc3339(), track_id],
        )?;
        Ok(changed > 0)
    }

    /// Supprime une ligne ; retourne le nombre de lignes supprimées
    pub fn delete(&self, track_id: &str) -> rusqlite::Result<usize> {
        let conn = self.conn();
        conn.execute(&format!("DELETE FROM {TABLE} WHERE track_id = ?1"), [track_id])
    }

    /// Récupère toutes les lignes, les plus utilisées d'abord
    pub fn get_all(&self) -> rusqlite::Result<Vec<TrackRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {TABLE} ORDER BY hits DESC, track_id ASC"
        ))?;
        let rows = stmt
            .query_map([], TrackRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Récupère les lignes `ready`, les moins récemment utilisées d'abord
    pub fn get_ready(&self) -> rusqlite::Result<Vec<TrackRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {TABLE}
             WHERE state = 'ready'
             ORDER BY COALESCE(last_used, fetched_at) ASC, hits ASC"
        ))?;
        let rows = stmt
            .query_map([], TrackRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Purge toutes les lignes
    pub fn purge(&self) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(&format!("DELETE FROM {TABLE}"), [])?;
        Ok(())
    }
}
