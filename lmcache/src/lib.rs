//! # lmcache - Cache Store de LanMusic
//!
//! Stockage sur disque des artefacts audio téléchargés, indexés par
//! identifiant de piste, avec une base SQLite pour les métadonnées.
//!
//! ## Vue d'ensemble
//!
//! - [`TrackId`] : identifiant validé, clé unique du cache
//! - [`CacheStore`] : `lookup`, `put`, `mark_failed`, `evict`, `touch`,
//!   `consolidate`, `clean_staging`, `purge`
//! - [`EvictionPolicy`] : politique pluggable ([`LruPolicy`] par défaut)
//! - [`StagingSlot`] : emplacement temporaire pour l'outil de téléchargement
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use lmcache::{CacheLimits, CacheStore, TrackId};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CacheStore::open("./cache", CacheLimits { max_entries: 500, max_bytes: 0 })?;
//!     let id = TrackId::new("dQw4w9WgXcQ")?;
//!
//!     let slot = store.staging_slot(&id);
//!     // ... l'outil écrit `slot.stem().with_extension("mp3")` ...
//!     let entry = store
//!         .put(&id, &slot.stem().with_extension("mp3"), "audio/mpeg")
//!         .await?;
//!     println!("{:?}", entry.path);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod staging;
pub mod store;
pub mod track_id;

#[cfg(feature = "lmconfig")]
pub mod config_ext;

pub use entry::{CacheEntry, CacheState};
pub use error::{StorageError, TrackIdError};
pub use eviction::{CacheLimits, EvictionPolicy, LruPolicy, NoEviction};
pub use staging::StagingSlot;
pub use store::{CacheStats, CacheStore, ConsolidateReport};
pub use track_id::TrackId;

#[cfg(feature = "lmconfig")]
pub use config_ext::CacheConfigExt;
