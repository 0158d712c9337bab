//! # lmserver - Serveur HTTP de LanMusic basé sur Axum
//!
//! Cette crate expose la bibliothèque musicale sur le réseau local :
//!
//! - **Streaming** : `GET|HEAD /stream/{id}` sert l'artefact audio d'une piste,
//!   avec support des requêtes `Range` (une seule plage). La première demande
//!   d'une piste absente du cache attend la fin de son téléchargement.
//! - **API JSON** : `/api/lanmusic/...` (catalogue, état des pistes, cache,
//!   historique, session), documentée avec OpenAPI et Swagger UI (`/swagger-ui`).
//! - **Logs** : `/log-sse`, `/log-dump` et `/api/logs/log_setup`.
//!
//! ## Architecture
//!
//! - [`server`] : serveur principal et builder
//! - [`streaming`] : service de streaming et correspondance erreurs / statuts HTTP
//! - [`range`] : interprétation de l'en-tête `Range`
//! - [`api`] : handlers de l'API JSON
//! - [`logs`] : logging `tracing` avec diffusion SSE
//!
//! ## Exemple d'utilisation
//!
//! ```rust,ignore
//! use lmserver::{LanMusicExt, ServerBuilder};
//!
//! let mut server = ServerBuilder::new_configured().build();
//! server.init_lanmusic(library, history, sessions)?;
//! server.start().await?;
//! server.wait().await;
//! ```

pub mod api;
pub mod config_ext;
pub mod logs;
pub mod range;
pub mod server;
pub mod streaming;

pub use api::{ApiState, LanMusicApiDoc, create_api_router};
pub use config_ext::LanMusicExt;
pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use range::{ByteRange, RangeRequest, parse_range};
pub use server::{Server, ServerBuilder, ServerInfo};
pub use streaming::{StreamError, StreamService, TrackStream, create_stream_router};
