//! Extension pour monter le streaming et l'API LanMusic sur le serveur

use crate::Server;
use crate::api::{ApiState, LanMusicApiDoc, create_api_router};
use crate::streaming::{StreamService, create_stream_router};
use anyhow::Result;
use lmlibrary::{History, Library, SessionStore};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;

/// Trait d'extension pour ajouter les services LanMusic à un [`Server`]
pub trait LanMusicExt {
    /// Enregistre les routes HTTP de LanMusic
    ///
    /// # Routes enregistrées
    ///
    /// - `GET|HEAD /stream/{id}` - Flux audio, avec support de `Range`
    /// - `/api/lanmusic/...` - Catalogue, cache, historique et session
    /// - documentation ajoutée au document OpenAPI du serveur (`/swagger-ui`)
    ///
    /// # Exemple
    ///
    /// ```rust,ignore
    /// let mut server = ServerBuilder::new_configured().build();
    /// server.init_lanmusic(library, history, sessions)?;
    /// server.start().await?;
    /// ```
    fn init_lanmusic(
        &mut self,
        library: Arc<Library>,
        history: Arc<History>,
        sessions: Arc<SessionStore>,
    ) -> Result<()>;
}

impl LanMusicExt for Server {
    fn init_lanmusic(
        &mut self,
        library: Arc<Library>,
        history: Arc<History>,
        sessions: Arc<SessionStore>,
    ) -> Result<()> {
        let stream_router = create_stream_router(StreamService::new(library.clone()));
        self.add_router("/", stream_router);

        let state = ApiState {
            library,
            history,
            sessions,
        };
        self.add_openapi(create_api_router(state), LanMusicApiDoc::openapi(), "lanmusic");

        info!("LanMusic routes registered");
        Ok(())
    }
}
