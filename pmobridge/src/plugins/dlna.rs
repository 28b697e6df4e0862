//! Plugin DLNA/UPnP MediaRenderer

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use ureq::Agent;

use super::description::{DeviceDescription, fetch_description};
use super::{RendererPlugin, display_name, resolve_udn};
use crate::encoders::Encoder;
use crate::errors::{DeviceControlError, PluginError};
use crate::model::{Announcement, ControlEndpoints, DeviceDescriptor, DeviceId, Flavour, PlaybackState};
use crate::soap_client::http_agent;
use crate::upnp_clients::{
    AvTransportClient, ConnectionManagerClient, RenderingControlClient, didl_metadata,
    resolve_control_url,
};

pub const DLNA_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

const MEDIA_RENDERER_PREFIX: &str = "urn:schemas-upnp-org:device:MediaRenderer:";
const STREAM_TITLE: &str = "PMODlna live audio";
const FALLBACK_MIME: &str = "audio/mpeg";

pub struct DlnaPlugin {
    agent: Agent,
}

impl DlnaPlugin {
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
        let base = description.base(location);
        let control = |fragment: &str| {
            description
                .service(fragment)
                .map(|s| resolve_control_url(base, &s.control_url))
        };

        let avtransport = control(":service:AVTransport:")
            .ok_or_else(|| PluginError::not_a_renderer(location, "no AVTransport service"))?;

        let udn = resolve_udn(description, announcement_udn, location)?;
        let name = display_name(description, &udn);

        let endpoints = ControlEndpoints {
            avtransport: Some(avtransport),
            rendering_control: control(":service:RenderingControl:"),
            connection_manager: control(":service:ConnectionManager:"),
            host: url::Url::parse(location)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string)),
            port: None,
        };

        let mime_types = self.sink_mime_types(&name, endpoints.connection_manager.as_deref());

        Ok(DeviceDescriptor {
            id: DeviceId::new(udn),
            name,
            flavour: Flavour::Dlna,
            location: location.to_string(),
            model_name: description.model_name.clone(),
            manufacturer: description.manufacturer.clone(),
            endpoints,
            mime_types,
            state: PlaybackState::Unknown,
            last_seen: Utc::now(),
        })
    }

    /// Types MIME annoncés par GetProtocolInfo, `audio/mpeg` à défaut
    fn sink_mime_types(&self, name: &str, connection_manager: Option<&str>) -> Vec<String> {
        let Some(url) = connection_manager else {
            return vec![FALLBACK_MIME.to_string()];
        };

        match ConnectionManagerClient::new(self.agent.clone(), url.to_string()).get_protocol_info() {
            Ok(info) => {
                let mimes = info.sink_mime_types();
                if mimes.is_empty() {
                    vec![FALLBACK_MIME.to_string()]
                } else {
                    mimes
                }
            }
            Err(e) => {
                warn!("⚠️ GetProtocolInfo failed for {}: {}; assuming {}", name, e, FALLBACK_MIME);
                vec![FALLBACK_MIME.to_string()]
            }
        }
    }

    fn avtransport(&self, device: &DeviceDescriptor) -> Result<AvTransportClient, DeviceControlError> {
        device
            .endpoints
            .avtransport
            .clone()
            .map(|url| AvTransportClient::new(self.agent.clone(), url))
            .ok_or_else(|| DeviceControlError::unsupported("AVTransport"))
    }

    fn rendering_control(&self, device: &DeviceDescriptor) -> Result<RenderingControlClient, DeviceControlError> {
        device
            .endpoints
            .rendering_control
            .clone()
            .map(|url| RenderingControlClient::new(self.agent.clone(), url))
            .ok_or_else(|| DeviceControlError::unsupported("RenderingControl"))
    }
}

impl RendererPlugin for DlnaPlugin {
    fn flavour(&self) -> Flavour {
        Flavour::Dlna
    }

    fn search_target(&self) -> &'static str {
        DLNA_SEARCH_TARGET
    }

    fn matches(&self, announcement: &Announcement) -> bool {
        announcement.target.starts_with(MEDIA_RENDERER_PREFIX)
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
        let avt = self.avtransport(device)?;
        let metadata = didl_metadata(STREAM_TITLE, url, encoder.mime_type());

        debug!("SetAVTransportURI {} -> {}", device.name, url);
        avt.set_av_transport_uri(url, &metadata)?;
        avt.play()?;
        info!("▶️ {} is playing {}", device.name, url);
        Ok(())
    }

    fn stop(&self, device: &DeviceDescriptor) -> Result<(), DeviceControlError> {
        self.avtransport(device)?.stop()?;
        info!("⏹️ {} stopped", device.name);
        Ok(())
    }

    fn get_volume(&self, device: &DeviceDescriptor) -> Result<u8, DeviceControlError> {
        self.rendering_control(device)?.get_volume()
    }

    fn set_volume(&self, device: &DeviceDescriptor, volume: u8) -> Result<(), DeviceControlError> {
        self.rendering_control(device)?.set_volume(volume)
    }
}
