//! Extension pour intégrer le Cache Store dans lmconfig
//!
//! Ce module fournit le trait `CacheConfigExt` qui ajoute à
//! `lmconfig::Config` la lecture des paramètres du cache et la
//! construction d'un [`CacheStore`] configuré.

use crate::{CacheLimits, CacheStore};
use anyhow::Result;
use lmconfig::Config;
use serde_yaml::{Number, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_MAX_ENTRIES: u64 = 2000;
const DEFAULT_STAGING_MAX_AGE_SECS: u64 = 3600;

/// Trait d'extension pour la configuration du cache
///
/// # Exemple
///
/// ```rust,ignore
/// use lmconfig::get_config;
/// use lmcache::CacheConfigExt;
///
/// let config = get_config();
/// let store = config.create_cache_store()?;
/// ```
pub trait CacheConfigExt {
    /// Récupère le répertoire du cache (créé si besoin)
    fn get_cache_dir(&self) -> Result<PathBuf>;

    /// Récupère les limites du cache (`cache.max_entries`, `cache.max_bytes`)
    fn get_cache_limits(&self) -> CacheLimits;

    /// Définit le nombre maximal d'artefacts
    fn set_cache_max_entries(&self, max_entries: usize) -> Result<()>;

    /// Âge au-delà duquel un fichier de `.staging/` est considéré abandonné
    fn get_staging_max_age(&self) -> Duration;

    /// Crée le Cache Store configuré
    fn create_cache_store(&self) -> Result<Arc<CacheStore>>;
}

impl CacheConfigExt for Config {
    fn get_cache_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["cache", "directory"], DEFAULT_CACHE_DIR)
    }

    fn get_cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.get_u64(&["cache", "max_entries"], DEFAULT_MAX_ENTRIES) as usize,
            max_bytes: self.get_u64(&["cache", "max_bytes"], 0),
        }
    }

    fn set_cache_max_entries(&self, max_entries: usize) -> Result<()> {
        self.set_value(
            &["cache", "max_entries"],
            Value::Number(Number::from(max_entries as u64)),
        )
    }

    fn get_staging_max_age(&self) -> Duration {
        Duration::from_secs(self.get_u64(
            &["cache", "staging_max_age_secs"],
            DEFAULT_STAGING_MAX_AGE_SECS,
        ))
    }

    fn create_cache_store(&self) -> Result<Arc<CacheStore>> {
        let dir = self.get_cache_dir()?;
        let limits = self.get_cache_limits();
        Ok(Arc::new(CacheStore::open(dir, limits)?))
    }
}
