//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour exposer des routes HTTP
//! avec Axum, en cachant la configuration de l'écoute et de l'arrêt.
//!
//! ## Fonctionnalités
//!
//! - 🚀 **Routes JSON simples** : endpoints API avec `add_route()`
//! - 🔀 **Sous-routers** : composition avec `add_router()`
//! - 🔌 **Bind anticipé** : `bind()` échoue tôt, avec le processus fautif si le port est pris
//! - ⚡ **Arrêt gracieux** : piloté par un `CancellationToken`

use crate::logs::{LoggingOptions, LogState, init_logging, logs_router};
use axum::routing::get;
use axum::{Json, Router};
use pmoutils::{ProcessPortInfo, TransportProtocol, find_process_using_port};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Le socket d'écoute n'a pas pu être ouvert
#[derive(Debug, thiserror::Error)]
pub enum StreamBindError {
    #[error("port {port} is already in use{}", holder_suffix(.holder))]
    AddrInUse {
        port: u16,
        holder: Option<ProcessPortInfo>,
    },

    #[error("cannot listen on {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server {0} is already started")]
    AlreadyStarted(String),
}

fn holder_suffix(holder: &Option<ProcessPortInfo>) -> String {
    match holder {
        Some(info) => format!(" by {}", info),
        None => String::new(),
    }
}

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub host: String,
    pub http_port: u16,
    pub base_url: String,
}

/// Serveur principal
pub struct Server {
    name: String,
    host: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    listener: Option<TcpListener>,
    join_handle: Option<JoinHandle<()>>,
    log_state: Option<LogState>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `host` - Hôte annoncé dans les URLs publiques (ex: "192.168.1.10")
    /// * `http_port` - Port HTTP à écouter, `0` pour un port éphémère
    pub fn new(name: impl Into<String>, host: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            listener: None,
            join_handle: None,
            log_state: None,
        }
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure fournie est appelée à chaque requête GET sur le chemin.
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).route(path, get(handler));
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, sub_router)
        };
    }

    /// Ouvre le socket d'écoute sur toutes les interfaces.
    ///
    /// À appeler avant toute annonce d'URL : un port occupé est une erreur
    /// fatale pour l'appelant. Retourne l'adresse effectivement liée.
    pub async fn bind(&mut self) -> Result<SocketAddr, StreamBindError> {
        if self.listener.is_some() || self.join_handle.is_some() {
            return Err(StreamBindError::AlreadyStarted(self.name.clone()));
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                StreamBindError::AddrInUse {
                    port: self.http_port,
                    holder: find_process_using_port(self.http_port, TransportProtocol::Tcp),
                }
            } else {
                StreamBindError::Io { addr, source }
            }
        })?;

        let local = listener.local_addr().map_err(|source| StreamBindError::Io { addr, source })?;
        self.http_port = local.port();
        self.listener = Some(listener);
        Ok(local)
    }

    /// Démarre le serveur HTTP
    ///
    /// Lie le socket si `bind()` n'a pas été appelé. Le serveur s'arrête
    /// gracieusement quand `shutdown` est déclenché : les connexions en cours
    /// se terminent quand leurs corps de réponse se ferment.
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<(), StreamBindError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            return Err(StreamBindError::AlreadyStarted(self.name.clone()));
        };

        info!(
            "🌐 Server {} running at http://{}:{}",
            self.name, self.host, self.http_port
        );

        let router = self.router.read().await.clone();
        let name = self.name.clone();
        self.join_handle = Some(tokio::spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match result {
                Ok(()) => info!("Server {} stopped", name),
                Err(e) => error!("❌ Server {} failed: {}", name, e),
            }
        }));

        Ok(())
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// URL de base publique (`http://host:port`)
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            host: self.host.clone(),
            http_port: self.http_port,
            base_url: self.base_url(),
        }
    }

    /// Initialise le système de logging et enregistre les routes de logs
    ///
    /// Routes ajoutées : `/log-sse`, `/log-dump`, `/log_setup`.
    pub async fn init_logging(&mut self, options: LoggingOptions) -> LogState {
        let log_state = init_logging(options);
        self.add_router("/", logs_router(log_state.clone())).await;
        self.log_state = Some(log_state.clone());
        log_state
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    host: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, host: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            http_port,
        }
    }

    /// Builder initialisé depuis la section `host` de la configuration.
    ///
    /// Retourne `None` si aucun hôte n'est configuré ni détectable.
    pub fn from_config(name: impl Into<String>, config: &pmoconfig::Config) -> Option<Self> {
        let host = config.get_bind_host()?;
        Some(Self::new(name, host, config.get_http_port()))
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reports_port_in_use() {
        let mut first = ServerBuilder::new("first", "127.0.0.1", 0).build();
        let addr = first.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(first.http_port(), addr.port());

        let mut second = ServerBuilder::new("second", "127.0.0.1", addr.port()).build();
        match second.bind().await {
            Err(StreamBindError::AddrInUse { port, .. }) => assert_eq!(port, addr.port()),
            other => panic!("expected AddrInUse, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_serves_routes_and_stops_on_cancel() {
        let mut server = ServerBuilder::new("test", "127.0.0.1", 0).build();
        server.add_route("/api/ping", || async { "pong" }).await;
        let addr = server.bind().await.unwrap();
        let token = CancellationToken::new();
        server.start(token.clone()).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /api/ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("\"pong\""));

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), server.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_bind_error_message_names_holder() {
        let err = StreamBindError::AddrInUse {
            port: 8080,
            holder: Some(ProcessPortInfo {
                pid: 7,
                process_name: "nginx".into(),
                owner: "www".into(),
                port: 8080,
            }),
        };
        assert_eq!(
            err.to_string(),
            "port 8080 is already in use by nginx (pid 7, user www) on port 8080"
        );
    }
}
