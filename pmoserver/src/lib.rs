//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit le serveur HTTP de PMODlna et son système de logs.
//!
//! ## Fonctionnalités
//!
//! - 🚀 **API de haut niveau** : routes JSON et sous-routers Axum
//! - 🔌 **Bind anticipé** : erreur explicite si le port est déjà pris
//! - 📡 **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - ⚡ **Arrêt gracieux** : piloté par un `CancellationToken`
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = ServerBuilder::new("PMODlna", "192.168.1.10", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await;
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     let shutdown = CancellationToken::new();
//!     server.start(shutdown.clone()).await.unwrap();
//!     server.wait().await;
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo, StreamBindError};
