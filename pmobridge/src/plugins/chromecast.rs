//! Chromecast backend using the rust_cast library.
//!
//! Les Chromecast répondent au M-SEARCH DIAL ; leur description UPnP ne
//! sert qu'à l'identité (UDN, nom). Le contrôle passe par le canal cast
//! (TLS, port 8009) : lancement du Default Media Receiver puis `load` d'un
//! flux en direct.

use std::sync::Once;
use std::time::Duration;

use chrono::Utc;
use rust_cast::CastDevice;
use rust_cast::channels::media::{Media, StreamType};
use rust_cast::channels::receiver::CastDeviceApp;
use tracing::{debug, info};
use ureq::Agent;

use super::description::{DeviceDescription, fetch_description};
use super::{RendererPlugin, display_name, resolve_udn};
use crate::encoders::Encoder;
use crate::errors::{DeviceControlError, PluginError};
use crate::model::{Announcement, ControlEndpoints, DeviceDescriptor, DeviceId, Flavour, PlaybackState};
use crate::soap_client::http_agent;

pub const CHROMECAST_SEARCH_TARGET: &str = "urn:dial-multiscreen-org:device:dial:1";

const CAST_PORT: u16 = 8009;
const DEFAULT_DESTINATION_ID: &str = "receiver-0";
const SUPPORTED_MIME_TYPES: &[&str] = &["audio/mpeg", "audio/flac", "audio/wav", "audio/ogg"];

/// Ensures the Rustls CryptoProvider is initialized exactly once.
fn ensure_crypto_provider_initialized() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
    });
}

pub struct ChromecastPlugin {
    agent: Agent,
}

impl ChromecastPlugin {
    pub fn new(http_timeout: Duration) -> Self {
        Self {
            agent: http_agent(http_timeout),
        }
    }

    fn build(
        &self,
        description: &DeviceDescription,
        location: &str,
        announcement_udn: Option<&str>,
    ) -> Result<DeviceDescriptor, PluginError> {
        let is_dial = description
            .device_type
            .as_deref()
            .is_some_and(|t| t.contains("dial-multiscreen-org:device:dial"));
        let is_google = description
            .manufacturer
            .as_deref()
            .is_some_and(|m| m.contains("Google"));
        if !is_dial || !is_google {
            return Err(PluginError::not_a_renderer(location, "not a Google cast device"));
        }

        let host = url::Url::parse(location)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| PluginError::parse(location, "no host in location"))?;

        let udn = resolve_udn(description, announcement_udn, location)?;
        let name = display_name(description, &udn);

        Ok(DeviceDescriptor {
            id: DeviceId::new(udn),
            name,
            flavour: Flavour::Chromecast,
            location: location.to_string(),
            model_name: description.model_name.clone(),
            manufacturer: description.manufacturer.clone(),
            endpoints: ControlEndpoints {
                host: Some(host),
                port: Some(CAST_PORT),
                ..Default::default()
            },
            mime_types: SUPPORTED_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            state: PlaybackState::Unknown,
            last_seen: Utc::now(),
        })
    }

    /// Ouvre une connexion fraîche sur le canal receiver.
    fn connect<'a>(&self, action: &str, device: &'a DeviceDescriptor) -> Result<CastDevice<'a>, DeviceControlError> {
        ensure_crypto_provider_initialized();

        let host = device
            .endpoints
            .host
            .as_deref()
            .ok_or_else(|| DeviceControlError::unsupported(action))?;
        let port = device.endpoints.port.unwrap_or(CAST_PORT);

        debug!("Connecting to Chromecast at {}:{}", host, port);
        let cast = CastDevice::connect_without_host_verification(host, port)
            .map_err(|e| DeviceControlError::transport(action, e))?;
        cast.connection
            .connect(DEFAULT_DESTINATION_ID)
            .map_err(|e| DeviceControlError::transport(action, e))?;
        cast.heartbeat
            .ping()
            .map_err(|e| DeviceControlError::transport(action, e))?;
        Ok(cast)
    }
}

impl RendererPlugin for ChromecastPlugin {
    fn flavour(&self) -> Flavour {
        Flavour::Chromecast
    }

    fn search_target(&self) -> &'static str {
        CHROMECAST_SEARCH_TARGET
    }

    fn matches(&self, announcement: &Announcement) -> bool {
        announcement.target == CHROMECAST_SEARCH_TARGET
    }

    fn describe(&self, announcement: &Announcement) -> Result<DeviceDescriptor, PluginError> {
        let description = fetch_description(&self.agent, &announcement.location)?;
        self.build(&description, &announcement.location, announcement.udn.as_deref())
    }

    fn accept_description(
        &self,
        description: &DeviceDescription,
        location: &str,
    ) -> Result<DeviceDescriptor, PluginError> {
        self.build(description, location, None)
    }

    fn play(&self, device: &DeviceDescriptor, url: &str, encoder: &Encoder) -> Result<(), DeviceControlError> {
        let action = "Load";
        let cast = self.connect(action, device)?;

        let app = cast
            .receiver
            .launch_app(&CastDeviceApp::DefaultMediaReceiver)
            .map_err(|e| DeviceControlError::transport(action, e))?;
        debug!(
            "Launched app on {} with session_id: {}, transport_id: {}",
            device.name, app.session_id, app.transport_id
        );

        cast.connection
            .connect(app.transport_id.clone())
            .map_err(|e| DeviceControlError::transport(action, e))?;

        let media = Media {
            content_id: url.to_string(),
            content_type: encoder.mime_type().to_string(),
            stream_type: StreamType::Live,
            metadata: None,
            duration: None,
        };

        cast.media
            .load(app.transport_id.clone(), app.session_id.clone(), &media)
            .map_err(|e| DeviceControlError::transport(action, e))?;

        info!("▶️ {} is playing {}", device.name, url);
        Ok(())
    }

    fn stop(&self, device: &DeviceDescriptor) -> Result<(), DeviceControlError> {
        let action = "Stop";
        let cast = self.connect(action, device)?;

        let status = cast
            .receiver
            .get_status()
            .map_err(|e| DeviceControlError::transport(action, e))?;

        for app in &status.applications {
            cast.receiver
                .stop_app(app.session_id.clone())
                .map_err(|e| DeviceControlError::transport(action, e))?;
        }

        info!("⏹️ {} stopped", device.name);
        Ok(())
    }

    fn get_volume(&self, device: &DeviceDescriptor) -> Result<u8, DeviceControlError> {
        let action = "GetVolume";
        let cast = self.connect(action, device)?;

        let status = cast
            .receiver
            .get_status()
            .map_err(|e| DeviceControlError::transport(action, e))?;

        // f32 (0.0-1.0) vers 0-100
        let volume = (status.volume.level.unwrap_or(0.0) * 100.0).round() as u16;
        Ok(volume.min(100) as u8)
    }

    fn set_volume(&self, device: &DeviceDescriptor, volume: u8) -> Result<(), DeviceControlError> {
        let action = "SetVolume";
        let cast = self.connect(action, device)?;
        let level = (volume.min(100) as f32) / 100.0;

        cast.receiver
            .set_volume(level)
            .map_err(|e| DeviceControlError::transport(action, e))?;
        Ok(())
    }
}
