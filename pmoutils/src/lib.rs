//! Utilitaires réseau et système partagés par les crates PMODlna.
//!
//! - [`guess_local_ip`] : adresse IPv4 utilisée pour les connexions sortantes,
//!   sert d'hôte par défaut pour les URLs de stream annoncées aux renderers.
//! - [`list_ipv4_interfaces`] : interfaces IPv4 non-loopback, utilisées pour
//!   joindre le groupe multicast SSDP sur chaque réseau.
//! - [`find_process_using_port`] : identification du processus qui occupe un
//!   port, pour des messages d'erreur de bind lisibles.
mod ip_utils;
mod process;

pub use ip_utils::{guess_local_ip, list_ipv4_interfaces};
pub use process::{ProcessPortInfo, TransportProtocol, find_process_using_port};

/// Retourne une chaîne décrivant le système d'exploitation et sa version.
///
/// Utilisée dans l'en-tête `USER-AGENT` des requêtes SSDP.
///
/// # Format
/// - Linux: "Linux/6.5.0" ou "Ubuntu/22.04"
/// - Autre: "{OS}/Unknown"
pub fn get_os_string() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type());

    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version)
    } else {
        format!("{}/Unknown", os_type)
    }
}
