//! # lmlibrary - Library Index de LanMusic
//!
//! Catalogue des pistes connues, synchronisé depuis une source externe
//! (fichier local ou service HTTP authentifié par des credentials de
//! session), et état de leur artefact tel que rapporté par le coordinateur.
//!
//! On y trouve aussi l'historique d'écoute et la session de lecture
//! sauvegardée, exposés par l'API du serveur.

pub mod catalog;
pub mod credentials;
pub mod error;
pub mod history;
pub mod library;
pub mod record;
pub mod session;

#[cfg(feature = "lmconfig")]
pub mod config_ext;

pub use catalog::{CatalogSource, FileCatalog, HttpCatalog};
pub use credentials::SessionCredentials;
pub use error::LibraryError;
pub use history::History;
pub use library::{Library, UNKNOWN_ARTIST};
pub use record::LibraryRecord;
pub use session::{PlaylistSession, SessionStore};

#[cfg(feature = "lmconfig")]
pub use config_ext::LibraryConfigExt;
