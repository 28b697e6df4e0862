/*!
Client SSDP pour la recherche active.

Le client est un *control point* : il ne se lie pas au port 1900.
Il envoie ses M-SEARCH depuis un port éphémère et reçoit les réponses
HTTP/200 en unicast sur ce même port. L'écoute des NOTIFY multicast est
assurée séparément par [`SsdpListener`](super::SsdpListener).
*/

use super::{SSDP_MULTICAST_ADDR, SSDP_PORT, SsdpEvent, parse_message};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Client SSDP pour envoyer des M-SEARCH et collecter les réponses
pub struct SsdpClient {
    socket: UdpSocket,
    user_agent: String,
}

impl SsdpClient {
    /// Crée un nouveau client SSDP lié à un port éphémère
    pub fn new() -> std::io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket2.bind(&SocketAddr::V4(bind_addr).into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_millis(250)))?;
        socket.set_multicast_ttl_v4(2)?;

        debug!("SSDP client bound on {:?}", socket.local_addr());

        Ok(Self {
            socket,
            user_agent: format!(
                "{} UPnP/1.1 PMODlna/{}",
                pmoutils::get_os_string(),
                env!("CARGO_PKG_VERSION")
            ),
        })
    }

    /// Envoie un M-SEARCH pour un type donné
    pub fn send_msearch(&self, st: &str, mx: u32) -> std::io::Result<()> {
        let mx = mx.max(1); // MX doit être >= 1
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: {}\r\n\
             \r\n",
            SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st, self.user_agent
        );

        let addr = SocketAddrV4::new(multicast_group(), SSDP_PORT);

        match self.socket.send_to(msg.as_bytes(), addr) {
            Ok(_) => {
                info!("📤 M-SEARCH sent (ST={}, MX={})", st, mx);
                trace!("📨 M-SEARCH payload\n{}", msg);
                Ok(())
            }
            Err(e) => {
                warn!("❌ Failed to send M-SEARCH: {}", e);
                Err(e)
            }
        }
    }

    /// Envoie un M-SEARCH par cible puis collecte les réponses pendant `window`.
    ///
    /// Les messages mal formés sont journalisés et ignorés. Retourne le nombre
    /// de réponses transmises à `on_event`.
    pub fn search<F>(&self, targets: &[&str], window: Duration, mut on_event: F) -> usize
    where
        F: FnMut(SsdpEvent),
    {
        let mx = window.as_secs().clamp(1, 5) as u32;
        for st in targets {
            if let Err(e) = self.send_msearch(st, mx) {
                warn!("SSDP search for {} not sent: {}", st, e);
            }
        }

        let deadline = Instant::now() + window;
        let mut buf = [0u8; 8192];
        let mut count = 0;

        while Instant::now() < deadline {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    match parse_message(&data, from) {
                        Ok(Some(event)) => {
                            debug!("📥 SSDP response from {}: {}", from, event.usn());
                            count += 1;
                            on_event(event);
                        }
                        Ok(None) => {}
                        Err(e) => debug!("Ignoring SSDP message from {}: {}", from, e),
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("❌ SSDP client read error: {}", e);
                    break;
                }
            }
        }

        count
    }
}

pub(super) fn multicast_group() -> Ipv4Addr {
    SSDP_MULTICAST_ADDR
        .parse()
        .unwrap_or(Ipv4Addr::new(239, 255, 255, 250))
}
