//! # Plugins de renderers
//!
//! Une famille de renderers (DLNA/UPnP, Chromecast) = un plugin derrière le
//! trait [`RendererPlugin`]. Le plugin construit le [`DeviceDescriptor`] à
//! partir d'une annonce, choisit l'encodage et pilote la lecture.
//!
//! Toutes les méthodes de contrôle sont bloquantes (aller-retour réseau) :
//! le registre les exécute via `spawn_blocking`, jamais dans sa boucle.

mod chromecast;
pub mod description;
mod dlna;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use ureq::Agent;

pub use chromecast::{CHROMECAST_SEARCH_TARGET, ChromecastPlugin};
pub use description::{DeviceDescription, ServiceEntry, fetch_description, parse_description};
pub use dlna::{DLNA_SEARCH_TARGET, DlnaPlugin};

use crate::encoders::{Encoder, negotiate};
use crate::errors::{DeviceControlError, EncoderError, PluginError};
use crate::model::{Announcement, DeviceDescriptor, Flavour};
use crate::soap_client::http_agent;

pub trait RendererPlugin: Send + Sync {
    fn flavour(&self) -> Flavour;

    /// Cible `ST` des M-SEARCH de ce plugin
    fn search_target(&self) -> &'static str;

    /// Vrai si l'annonce (NT/ST) relève de ce plugin
    fn matches(&self, announcement: &Announcement) -> bool;

    /// Télécharge la description annoncée et construit le descripteur.
    fn describe(&self, announcement: &Announcement) -> Result<DeviceDescriptor, PluginError>;

    /// Construit un descripteur depuis une description déjà parsée.
    ///
    /// Utilisé pour les URLs fournies par l'opérateur, sans annonce SSDP.
    fn accept_description(
        &self,
        description: &DeviceDescription,
        location: &str,
    ) -> Result<DeviceDescriptor, PluginError> {
        let _ = description;
        Err(PluginError::not_a_renderer(location, format!("not a {} device", self.flavour())))
    }

    /// Encodeur validé le plus prioritaire dont le type MIME est accepté
    fn negotiate_encoding(
        &self,
        device: &DeviceDescriptor,
        encoders: &[Encoder],
    ) -> Result<Encoder, EncoderError> {
        negotiate(&device.mime_types, encoders)
            .cloned()
            .ok_or_else(|| EncoderError::NoCompatibleEncoding {
                device: device.name.clone(),
                accepted: device.mime_types.join(", "),
            })
    }

    fn play(&self, device: &DeviceDescriptor, url: &str, encoder: &Encoder) -> Result<(), DeviceControlError>;

    fn stop(&self, device: &DeviceDescriptor) -> Result<(), DeviceControlError>;

    /// Volume en pourcents (0-100)
    fn get_volume(&self, device: &DeviceDescriptor) -> Result<u8, DeviceControlError>;

    fn set_volume(&self, device: &DeviceDescriptor, volume: u8) -> Result<(), DeviceControlError>;
}

/// Ensemble ordonné des plugins actifs
#[derive(Clone)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn RendererPlugin>>,
    agent: Agent,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn RendererPlugin>>, http_timeout: Duration) -> Self {
        Self {
            plugins,
            agent: http_agent(http_timeout),
        }
    }

    /// Plugins DLNA puis Chromecast
    pub fn standard(http_timeout: Duration) -> Self {
        Self::new(
            vec![
                Arc::new(DlnaPlugin::new(http_timeout)),
                Arc::new(ChromecastPlugin::new(http_timeout)),
            ],
            http_timeout,
        )
    }

    pub fn plugins(&self) -> &[Arc<dyn RendererPlugin>] {
        &self.plugins
    }

    pub fn search_targets(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.search_target()).collect()
    }

    pub fn for_flavour(&self, flavour: Flavour) -> Option<Arc<dyn RendererPlugin>> {
        self.plugins.iter().find(|p| p.flavour() == flavour).cloned()
    }

    /// Premier plugin acceptant l'annonce
    pub fn find_match(&self, announcement: &Announcement) -> Option<Arc<dyn RendererPlugin>> {
        self.plugins.iter().find(|p| p.matches(announcement)).cloned()
    }

    /// Décrit un device à partir de l'URL de sa description.
    ///
    /// La description est téléchargée une fois puis proposée à chaque
    /// plugin dans l'ordre ; le premier qui l'accepte l'emporte.
    pub fn describe_url(&self, location: &str) -> Result<DeviceDescriptor, PluginError> {
        let description = fetch_description(&self.agent, location)?;

        let mut last_error = PluginError::not_a_renderer(location, "no plugin accepted the device");
        for plugin in &self.plugins {
            match plugin.accept_description(&description, location) {
                Ok(descriptor) => return Ok(descriptor),
                Err(e) => {
                    debug!("{} plugin rejected {}: {}", plugin.flavour(), location, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Nom affiché : friendlyName, sinon modèle, sinon UDN
pub(crate) fn display_name(description: &DeviceDescription, udn: &str) -> String {
    description
        .friendly_name
        .clone()
        .or_else(|| description.model_name.clone())
        .unwrap_or_else(|| udn.to_string())
}

/// UDN de la description, sinon celui de l'annonce
pub(crate) fn resolve_udn(
    description: &DeviceDescription,
    announcement_udn: Option<&str>,
    location: &str,
) -> Result<String, PluginError> {
    description
        .udn
        .clone()
        .or_else(|| announcement_udn.map(str::to_string))
        .ok_or_else(|| PluginError::parse(location, "missing UDN"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::list_encoders;
    use crate::model::DeviceId;

    struct NoopPlugin;

    impl RendererPlugin for NoopPlugin {
        fn flavour(&self) -> Flavour {
            Flavour::Dlna
        }
        fn search_target(&self) -> &'static str {
            DLNA_SEARCH_TARGET
        }
        fn matches(&self, _: &Announcement) -> bool {
            true
        }
        fn describe(&self, a: &Announcement) -> Result<DeviceDescriptor, PluginError> {
            Err(PluginError::fetch(&a.location, "offline"))
        }
        fn play(&self, _: &DeviceDescriptor, _: &str, _: &Encoder) -> Result<(), DeviceControlError> {
            Ok(())
        }
        fn stop(&self, _: &DeviceDescriptor) -> Result<(), DeviceControlError> {
            Ok(())
        }
        fn get_volume(&self, _: &DeviceDescriptor) -> Result<u8, DeviceControlError> {
            Ok(0)
        }
        fn set_volume(&self, _: &DeviceDescriptor, _: u8) -> Result<(), DeviceControlError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_negotiation_reports_incompatibility() {
        let mut encoders = list_encoders();
        for e in encoders.iter_mut() {
            e.validate_with(|_| Ok(())).unwrap();
        }
        let device = DeviceDescriptor::new(DeviceId::new("uuid:tv"), "TV", Flavour::Dlna, "http://tv/d.xml")
            .with_mime_types(["video/mp4"]);

        let err = NoopPlugin.negotiate_encoding(&device, &encoders).unwrap_err();
        assert_eq!(
            err,
            EncoderError::NoCompatibleEncoding {
                device: "TV".into(),
                accepted: "video/mp4".into()
            }
        );

        let device = device.with_mime_types(["audio/flac", "audio/mpeg"]);
        assert_eq!(NoopPlugin.negotiate_encoding(&device, &encoders).unwrap().suffix(), "mp3");
    }

    #[test]
    fn test_default_accept_description_rejects() {
        let err = NoopPlugin
            .accept_description(&DeviceDescription::default(), "http://h/d.xml")
            .unwrap_err();
        assert!(matches!(err, PluginError::NotARenderer { .. }));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut desc = DeviceDescription {
            model_name: Some("Box".into()),
            ..Default::default()
        };
        assert_eq!(display_name(&desc, "uuid:x"), "Box");
        desc.friendly_name = Some("Kitchen".into());
        assert_eq!(display_name(&desc, "uuid:x"), "Kitchen");
        assert_eq!(display_name(&DeviceDescription::default(), "uuid:x"), "uuid:x");
    }
}
