//! # Serveur HTTP de LanMusic
//!
//! Le serveur accumule des sous-routers (streaming, API JSON, logs) puis les
//! sert tous sur un seul port. Les API documentées sont regroupées dans un
//! seul document OpenAPI, publié avec Swagger UI au démarrage.

use crate::logs::{LogState, LoggingOptions, LogsApiDoc, create_logs_router, init_logging, log_dump, log_sse};
use anyhow::{Context, Result, bail};
use axum::Router;
use axum::routing::get;
use lmconfig::get_config;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa::openapi::OpenApiBuilder;
use utoipa_swagger_ui::SwaggerUi;

const SERVER_NAME: &str = "LanMusic";
const SWAGGER_PATH: &str = "/swagger-ui";
const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Info serveur sérialisable
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    /// Adresse annoncée aux clients
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Router,
    openapi: utoipa::openapi::OpenApi,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    log_state: Option<LogState>,
}

impl Server {
    /// Crée un serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (titre de la documentation, logs)
    /// * `base_url` - Adresse annoncée aux clients (ex: "192.168.1.20")
    /// * `http_port` - Port HTTP à écouter (0 : port libre choisi par le système)
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        let name = name.into();
        let openapi = OpenApiBuilder::new()
            .info(utoipa::openapi::InfoBuilder::new().title(&name).version(env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            name,
            base_url: base_url.into(),
            http_port,
            router: Router::new(),
            openapi,
            local_addr: None,
            shutdown: None,
            task: None,
            log_state: None,
        }
    }

    /// Serveur configuré depuis `host.base_url` et `host.http_port`
    pub fn new_configured() -> Self {
        ServerBuilder::new_configured().build()
    }

    /// Ajoute un sous-router
    ///
    /// `"/"` fusionne les routes telles quelles, tout autre chemin les
    /// préfixe.
    pub fn add_router(&mut self, path: &str, sub_router: Router) {
        let router = std::mem::take(&mut self.router);
        self.router = match path.trim_matches('/') {
            "" => router.merge(sub_router),
            prefix => router.nest(&format!("/{}", prefix), sub_router),
        };
    }

    /// Ajoute une API documentée, servie sous `/api/{name}`
    ///
    /// Sa documentation est fusionnée dans le document OpenAPI du serveur
    /// (les chemins y sont déjà absolus).
    pub fn add_openapi(&mut self, api_router: Router, openapi: utoipa::openapi::OpenApi, name: &str) {
        self.add_router(&format!("/api/{}", name), api_router);
        self.openapi.merge(openapi);
    }

    /// Document OpenAPI courant
    pub fn openapi(&self) -> &utoipa::openapi::OpenApi {
        &self.openapi
    }

    /// Router complet, documentation comprise
    pub fn router(&self) -> Router {
        self.router
            .clone()
            .merge(SwaggerUi::new(SWAGGER_PATH).url(OPENAPI_PATH, self.openapi.clone()))
    }

    /// Démarre le serveur HTTP
    ///
    /// Le port est ouvert avant le retour ; le service tourne ensuite en
    /// tâche de fond jusqu'à Ctrl+C ou [`shutdown`](Self::shutdown).
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.task.is_some() {
            bail!("Server {} is already running", self.name);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Unable to listen on {}", addr))?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel::<()>();
        let router = self.router();
        let name = self.name.clone();

        self.task = Some(tokio::spawn(async move {
            let shutdown = async move {
                let ctrl_c = async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("Ctrl+C received, shutting down gracefully"),
                        Err(e) => {
                            // Sans signal, seul shutdown() peut arrêter le serveur
                            error!("Unable to listen for Ctrl+C: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = rx => info!("Shutdown requested"),
                }
            };

            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                error!(server = %name, "HTTP server error: {}", e);
            }
        }));
        self.shutdown = Some(tx);
        self.local_addr = Some(local_addr);

        info!(
            "Server {} running at http://{}:{}",
            self.name,
            self.base_url,
            local_addr.port()
        );
        Ok(local_addr)
    }

    /// Adresse d'écoute effective, une fois démarré
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Demande l'arrêt du serveur (les connexions en cours se terminent)
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Attend l'arrêt du serveur
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("HTTP server task failed: {}", e);
            }
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.local_addr.map(|a| a.port()).unwrap_or(self.http_port),
        }
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Installe le subscriber `tracing` et enregistre les routes de logs
    ///
    /// Routes : `/log-sse`, `/log-dump` et l'API `/api/logs/log_setup`.
    pub fn init_logging(&mut self, options: LoggingOptions) -> LogState {
        let log_state = init_logging(options);

        let routes = Router::new()
            .route("/log-sse", get(log_sse))
            .route("/log-dump", get(log_dump))
            .with_state(log_state.clone());
        self.add_router("/", routes);
        self.add_openapi(create_logs_router(log_state.clone()), LogsApiDoc::openapi(), "logs");

        self.log_state = Some(log_state.clone());
        log_state
    }
}

/// Builder de [`Server`]
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: "localhost".to_string(),
            http_port: 0,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new(SERVER_NAME)
            .base_url(config.get_base_url())
            .http_port(config.get_http_port())
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}
