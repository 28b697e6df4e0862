//! # pmoupnp - briques UPnP côté control point
//!
//! - [`ssdp`] : découverte SSDP (recherche active M-SEARCH, écoute des
//!   annonces NOTIFY, parsing des messages)
//! - [`soap`] : construction des requêtes SOAP et parsing des enveloppes
//!   de réponse, y compris les faults UPnP

pub mod soap;
pub mod ssdp;
