use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Devine l'adresse IP locale de la machine.
///
/// Ouvre un socket UDP et le "connecte" vers `8.8.8.8:80` : aucun paquet
/// n'est émis, mais le système choisit l'interface de sortie, dont on lit
/// l'adresse locale.
///
/// Retourne `None` si aucune route n'est disponible. L'appelant décide du
/// repli (le binaire PMODlna refuse de démarrer sans hôte explicite).
pub fn guess_local_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Liste les adresses IPv4 non-loopback de toutes les interfaces réseau.
///
/// L'ordre suit celui rendu par le système ; les doublons sont éliminés.
/// Une erreur d'énumération donne une liste vide.
pub fn list_ipv4_interfaces() -> Vec<Ipv4Addr> {
    let mut result = Vec::new();

    if let Ok(interfaces) = get_if_addrs() {
        for iface in interfaces {
            if let IpAddr::V4(ip) = iface.ip() {
                if ip.is_loopback() || result.contains(&ip) {
                    continue;
                }
                result.push(ip);
            }
        }
    }

    result
}
