use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, get_sockets_info};
use std::fmt;
use sysinfo::{Pid, System};

/// Processus identifié comme occupant un port réseau.
#[derive(Debug, Clone)]
pub struct ProcessPortInfo {
    pub pid: u32,
    pub process_name: String,
    pub owner: String,
    pub port: u16,
}

impl fmt::Display for ProcessPortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid {}, user {}) on port {}",
            self.process_name, self.pid, self.owner, self.port
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// Tente de trouver le processus qui écoute sur `port` pour le protocole donné.
///
/// Retourne `None` si la table des sockets est illisible (droits insuffisants)
/// ou si aucun processus n'a pu être associé au port.
pub fn find_process_using_port(port: u16, protocol: TransportProtocol) -> Option<ProcessPortInfo> {
    let proto_flag = match protocol {
        TransportProtocol::Tcp => ProtocolFlags::TCP,
        TransportProtocol::Udp => ProtocolFlags::UDP,
    };

    let sockets = get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        proto_flag,
    )
    .ok()?;

    let mut system = System::new();
    system.refresh_processes();

    sockets
        .into_iter()
        .filter(|socket| match &socket.protocol_socket_info {
            ProtocolSocketInfo::Tcp(tcp) => tcp.local_port == port,
            ProtocolSocketInfo::Udp(udp) => udp.local_port == port,
        })
        .find_map(|socket| build_process_info(&system, port, socket.associated_pids.first()))
}

fn build_process_info(system: &System, port: u16, pid: Option<&u32>) -> Option<ProcessPortInfo> {
    let pid = *pid?;
    let process = system.process(Pid::from_u32(pid))?;

    let owner = process
        .user_id()
        .and_then(|uid| {
            users::get_user_by_uid(**uid).map(|user| user.name().to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string());

    Some(ProcessPortInfo {
        pid,
        process_name: process.name().to_string(),
        owner,
        port,
    })
}
