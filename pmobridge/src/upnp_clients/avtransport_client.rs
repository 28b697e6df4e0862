use pmoupnp::soap::SoapEnvelope;
use quick_xml::escape::escape;
use ureq::Agent;

use super::AVTRANSPORT_URN;
use crate::errors::DeviceControlError;
use crate::soap_client::invoke_upnp_action;

/// Drapeaux DLNA d'un flux en direct : pas de seek, transfert streaming.
const DLNA_LIVE_FLAGS: &str =
    "DLNA.ORG_OP=00;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct AvTransportClient {
    agent: Agent,
    pub control_url: String,
    pub service_type: String,
}

impl AvTransportClient {
    pub fn new(agent: Agent, control_url: String) -> Self {
        Self {
            agent,
            control_url,
            service_type: AVTRANSPORT_URN.to_string(),
        }
    }

    /// AVTransport:1 — SetAVTransportURI
    pub fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<(), DeviceControlError> {
        self.call(
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", metadata),
            ],
        )
        .map(|_| ())
    }

    /// AVTransport:1 — Play
    pub fn play(&self) -> Result<(), DeviceControlError> {
        self.call("Play", &[("InstanceID", "0"), ("Speed", "1")])
            .map(|_| ())
    }

    /// AVTransport:1 — Stop
    pub fn stop(&self) -> Result<(), DeviceControlError> {
        self.call("Stop", &[("InstanceID", "0")]).map(|_| ())
    }

    fn call(&self, action: &str, args: &[(&str, &str)]) -> Result<SoapEnvelope, DeviceControlError> {
        invoke_upnp_action(&self.agent, &self.control_url, &self.service_type, action, args)?
            .into_success(action)
    }
}

/// Métadonnées DIDL-Lite décrivant le flux envoyé au renderer
pub fn didl_metadata(title: &str, url: &str, mime_type: &str) -> String {
    format!(
        concat!(
            r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
            r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#,
            r#"<item id="0" parentID="-1" restricted="1">"#,
            r#"<dc:title>{title}</dc:title>"#,
            r#"<upnp:class>object.item.audioItem.musicTrack</upnp:class>"#,
            r#"<res protocolInfo="http-get:*:{mime}:{flags}">{url}</res>"#,
            r#"</item></DIDL-Lite>"#
        ),
        title = escape(title),
        mime = mime_type,
        flags = DLNA_LIVE_FLAGS,
        url = escape(url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_didl_metadata_escapes_title_and_url() {
        let didl = didl_metadata("Living & Room", "http://h:8080/stream/a.mp3?x=1&y=2", "audio/mpeg");
        assert!(didl.contains("<dc:title>Living &amp; Room</dc:title>"));
        assert!(didl.contains("x=1&amp;y=2</res>"));
        assert!(didl.contains(r#"protocolInfo="http-get:*:audio/mpeg:DLNA.ORG_OP=00;"#));
    }
}
