//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Ce module implémente la partie *control point* de SSDP :
//!
//! - ✅ Recherche active (M-SEARCH) sur un port éphémère, fenêtre de réponse bornée
//! - ✅ Écoute permanente des annonces NOTIFY alive/byebye sur 239.255.255.250:1900
//! - ✅ Parsing tolérant des messages (en-têtes insensibles à la casse)
//!
//! ## Architecture
//!
//! - [`SsdpClient`] : envoi des M-SEARCH et collecte des réponses unicast
//! - [`SsdpListener`] : écoute multicast des NOTIFY, arrêtée par un `CancellationToken`
//! - [`parse_message`] : conversion d'un datagramme en [`SsdpEvent`]

mod client;
mod listener;
mod parser;

pub use client::SsdpClient;
pub use listener::SsdpListener;
pub use parser::{SsdpEvent, SsdpParseError, extract_udn_from_usn, parse_message};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (en secondes) quand CACHE-CONTROL est absent
pub const MAX_AGE: u32 = 1800;
