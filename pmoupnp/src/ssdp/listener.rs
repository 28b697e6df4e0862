//! Écoute des annonces NOTIFY multicast

use super::client::multicast_group;
use super::{SSDP_PORT, SsdpEvent, parse_message};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Écouteur SSDP lié à 0.0.0.0:1900 et abonné au groupe multicast
/// sur chaque interface IPv4.
pub struct SsdpListener {
    socket: UdpSocket,
}

impl SsdpListener {
    pub fn bind() -> std::io::Result<Self> {
        Self::bind_port(SSDP_PORT)
    }

    /// Variante paramétrable pour les tests
    pub fn bind_port(port: u16) -> std::io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        #[cfg(unix)]
        socket2.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket2.bind(&SocketAddr::V4(bind_addr).into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        let group = multicast_group();
        let mut joined = 0;
        for ipv4 in pmoutils::list_ipv4_interfaces() {
            match socket.join_multicast_v4(&group, &ipv4) {
                Ok(()) => {
                    joined += 1;
                    debug!("SSDP: joined {} on {}", group, ipv4);
                }
                Err(e) => warn!("SSDP: failed to join {} on {}: {}", group, ipv4, e),
            }
        }
        if joined == 0 {
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        }

        info!("✅ SSDP listener ready on port {}", port);
        Ok(Self { socket })
    }

    /// Boucle de réception bloquante.
    ///
    /// Les messages mal formés sont ignorés ; la boucle ne se termine que
    /// lorsque `cancel` est déclenché (vérifié au plus toutes les secondes).
    pub fn run<F>(&self, cancel: &CancellationToken, mut on_event: F)
    where
        F: FnMut(SsdpEvent),
    {
        let mut buf = [0u8; 8192];
        while !cancel.is_cancelled() {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    match parse_message(&data, from) {
                        Ok(Some(event)) => on_event(event),
                        Ok(None) => {}
                        Err(e) => trace!("Ignoring SSDP message from {}: {}", from, e),
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("❌ SSDP listener read error: {}", e);
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }
        info!("SSDP listener stopped");
    }
}
