//! # lmfetch - Fetcher Adapter
//!
//! Télécharge l'audio d'une piste au moyen d'un outil externe traité comme
//! une boîte noire (yt-dlp par défaut) :
//!
//! - le [`Fetcher`] reçoit une référence (identifiant ou URL source) et un
//!   chemin sans extension dans le répertoire temporaire de l'appelant ;
//! - [`CommandFetcher`] lance le sous-processus avec un délai maximal, tue
//!   le processus et supprime les sorties partielles en cas de dépassement ;
//! - toute défaillance est normalisée en [`FetchError`].

pub mod command;
pub mod error;
pub mod fetcher;
pub mod metadata;

#[cfg(feature = "lmconfig")]
pub mod config_ext;

pub use command::{CommandFetcher, CommandFetcherSettings, DEFAULT_ARGS};
pub use error::{FetchError, FetchErrorKind};
pub use fetcher::{content_type_for_extension, FetchedAudio, Fetcher};
pub use metadata::TrackMetadata;

#[cfg(feature = "lmconfig")]
pub use config_ext::FetcherConfigExt;
