//! # Découverte des renderers
//!
//! Deux sources d'annonces SSDP alimentent le registre :
//!
//! - l'écouteur permanent (NOTIFY `ssdp:alive` / `ssdp:byebye`), sur un
//!   thread dédié arrêté par un `CancellationToken` ;
//! - la recherche active (M-SEARCH) pour chaque cible des plugins.
//!
//! Chaque annonce est confiée au premier plugin qui la reconnaît. Le
//! téléchargement de la description est bloquant et ne se fait jamais sur
//! la boucle du registre.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use pmoupnp::ssdp::{SsdpClient, SsdpEvent, SsdpListener, extract_udn_from_usn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::DiscoveryError;
use crate::model::{Announcement, DeviceId};
use crate::plugins::PluginSet;
use crate::registry::RegistryHandle;

struct Seen {
    max_age: u64,
    fetched: Instant,
}

/// Cache des UDN déjà décrits.
///
/// Une nouvelle description n'est téléchargée qu'après la moitié du
/// `max-age` annoncé.
#[derive(Default)]
pub struct SeenCache {
    seen: HashMap<String, Seen>,
}

impl SeenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fetch(&mut self, udn: &str, max_age: u32) -> bool {
        self.should_fetch_at(udn, max_age, Instant::now())
    }

    fn should_fetch_at(&mut self, udn: &str, max_age: u32, now: Instant) -> bool {
        if let Some(seen) = self.seen.get_mut(udn) {
            if now.duration_since(seen.fetched).as_secs() < seen.max_age / 2 {
                return false;
            }
            seen.fetched = now;
            seen.max_age = max_age as u64;
            return true;
        }
        self.seen.insert(
            udn.to_string(),
            Seen {
                max_age: max_age as u64,
                fetched: now,
            },
        );
        true
    }

    pub fn forget(&mut self, udn: &str) {
        self.seen.remove(udn);
    }
}

/// Annonce de présence, `None` pour un byebye
pub fn announcement_from_event(event: &SsdpEvent) -> Option<Announcement> {
    let (usn, target, location, server, max_age) = match event {
        SsdpEvent::Alive {
            usn,
            nt,
            location,
            server,
            max_age,
            ..
        } => (usn, nt, location, server, *max_age),
        SsdpEvent::SearchResponse {
            usn,
            st,
            location,
            server,
            max_age,
            ..
        } => (usn, st, location, server, *max_age),
        SsdpEvent::ByeBye { .. } => return None,
    };

    Some(Announcement {
        usn: usn.clone(),
        udn: extract_udn_from_usn(usn),
        target: target.clone(),
        location: location.clone(),
        server: server.clone(),
        max_age,
    })
}

#[derive(Clone)]
pub struct Discovery {
    plugins: PluginSet,
    registry: RegistryHandle,
    seen: Arc<Mutex<SeenCache>>,
}

impl Discovery {
    pub fn new(plugins: PluginSet, registry: RegistryHandle) -> Self {
        Self {
            plugins,
            registry,
            seen: Arc::new(Mutex::new(SeenCache::new())),
        }
    }

    fn lock_seen(&self) -> MutexGuard<'_, SeenCache> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Traite une annonce (appel bloquant).
    ///
    /// Retourne `true` si un device a été décrit et transmis au registre.
    pub fn handle_event(&self, event: SsdpEvent) -> bool {
        if let SsdpEvent::ByeBye { usn, .. } = &event {
            if let Some(udn) = extract_udn_from_usn(usn) {
                debug!("👋 ssdp:byebye from {}", udn);
                self.lock_seen().forget(&udn);
                self.registry.device_lost(DeviceId::new(udn));
            }
            return false;
        }

        match announcement_from_event(&event) {
            Some(announcement) => self.describe(announcement),
            None => false,
        }
    }

    fn describe(&self, announcement: Announcement) -> bool {
        let Some(plugin) = self.plugins.find_match(&announcement) else {
            trace!("No plugin for {} ({})", announcement.usn, announcement.target);
            return false;
        };
        let Some(udn) = announcement.udn.clone() else {
            debug!("Announcement without UDN ignored: {}", announcement.usn);
            return false;
        };
        if !self.lock_seen().should_fetch(&udn, announcement.max_age) {
            trace!("{} already described", udn);
            return false;
        }

        match plugin.describe(&announcement) {
            Ok(device) => {
                debug!("Described {} renderer {} at {}", device.flavour, device.id, device.location);
                self.registry.device_found(device);
                true
            }
            Err(e) => {
                warn!("⚠️ Skipping {} at {}: {}", udn, announcement.location, e);
                self.lock_seen().forget(&udn);
                false
            }
        }
    }

    /// Recherche active pendant `window`.
    ///
    /// Retourne le nombre de devices décrits.
    pub async fn search(&self, window: Duration) -> Result<usize, DiscoveryError> {
        let discovery = self.clone();
        tokio::task::spawn_blocking(move || discovery.search_blocking(window))
            .await
            .map_err(|e| DiscoveryError::Worker(e.to_string()))?
    }

    fn search_blocking(&self, window: Duration) -> Result<usize, DiscoveryError> {
        let client = SsdpClient::new()?;
        let targets = self.plugins.search_targets();
        info!("🔍 Searching renderers for {:?}", window);

        let mut responses = Vec::new();
        client.search(&targets, window, |event| responses.push(event));

        let described = responses
            .into_iter()
            .filter(|event| self.handle_event(event.clone()))
            .count();
        info!("🔍 Search done: {} renderer(s) described", described);
        Ok(described)
    }

    /// Lance l'écouteur NOTIFY sur un thread dédié.
    ///
    /// Les descriptions sont téléchargées sur le pool bloquant de tokio,
    /// l'écouteur n'attend jamais le réseau.
    pub fn spawn_listener(
        &self,
        cancel: CancellationToken,
    ) -> Result<std::thread::JoinHandle<()>, DiscoveryError> {
        let listener = SsdpListener::bind()?;
        self.spawn_on(listener, cancel)
    }

    fn spawn_on(
        &self,
        listener: SsdpListener,
        cancel: CancellationToken,
    ) -> Result<std::thread::JoinHandle<()>, DiscoveryError> {
        let runtime = tokio::runtime::Handle::current();
        let discovery = self.clone();

        std::thread::Builder::new()
            .name("ssdp-listener".into())
            .spawn(move || {
                listener.run(&cancel, |event| {
                    let discovery = discovery.clone();
                    runtime.spawn_blocking(move || discovery.handle_event(event));
                });
            })
            .map_err(DiscoveryError::Socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn from() -> SocketAddr {
        "192.168.1.30:1900".parse().unwrap()
    }

    #[test]
    fn test_seen_cache_waits_half_max_age() {
        let mut cache = SeenCache::new();
        let t0 = Instant::now();
        assert!(cache.should_fetch_at("uuid:a", 1800, t0));
        assert!(!cache.should_fetch_at("uuid:a", 1800, t0 + Duration::from_secs(10)));
        assert!(!cache.should_fetch_at("uuid:a", 1800, t0 + Duration::from_secs(899)));
        assert!(cache.should_fetch_at("uuid:a", 1800, t0 + Duration::from_secs(900)));
        assert!(cache.should_fetch_at("uuid:b", 1800, t0));
    }

    #[test]
    fn test_forget_allows_refetch() {
        let mut cache = SeenCache::new();
        assert!(cache.should_fetch("uuid:a", 1800));
        cache.forget("uuid:a");
        assert!(cache.should_fetch("uuid:a", 1800));
    }

    #[test]
    fn test_search_response_becomes_announcement() {
        let event = SsdpEvent::SearchResponse {
            usn: "uuid:tv-1::urn:schemas-upnp-org:device:MediaRenderer:1".into(),
            st: "urn:schemas-upnp-org:device:MediaRenderer:1".into(),
            location: "http://192.168.1.30:49152/desc.xml".into(),
            server: "Linux UPnP/1.0 TV/1.0".into(),
            max_age: 1800,
            from: from(),
        };
        let a = announcement_from_event(&event).unwrap();
        assert_eq!(a.udn.as_deref(), Some("uuid:tv-1"));
        assert_eq!(a.target, "urn:schemas-upnp-org:device:MediaRenderer:1");
        assert_eq!(a.location, "http://192.168.1.30:49152/desc.xml");
        assert_eq!(a.max_age, 1800);
    }

    #[test]
    fn test_byebye_has_no_announcement() {
        let event = SsdpEvent::ByeBye {
            usn: "uuid:tv-1::upnp:rootdevice".into(),
            nt: "upnp:rootdevice".into(),
            from: from(),
        };
        assert!(announcement_from_event(&event).is_none());
    }
}
