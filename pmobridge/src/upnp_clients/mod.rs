mod avtransport_client;
mod connection_manager_client;
mod rendering_control_client;

pub use crate::upnp_clients::avtransport_client::{AvTransportClient, didl_metadata};
pub use crate::upnp_clients::connection_manager_client::{ConnectionManagerClient, ProtocolInfo};
pub use crate::upnp_clients::rendering_control_client::RenderingControlClient;

use pmoupnp::soap::find_child_with_suffix;
use url::Url;
use xmltree::Element;

use crate::errors::DeviceControlError;

pub const AVTRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const RENDERING_CONTROL_URN: &str = "urn:schemas-upnp-org:service:RenderingControl:1";
pub const CONNECTION_MANAGER_URN: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";

/// Resolve a possibly relative controlURL against the URLBase or the
/// description URL.
///
/// - Absolute URLs (`http://`, `https://`) are returned as-is.
/// - Otherwise the URL is joined with `base` following RFC 3986.
/// - If `base` cannot be parsed, the raw `control_url` is returned.
pub fn resolve_control_url(base: &str, control_url: &str) -> String {
    if control_url.starts_with("http://") || control_url.starts_with("https://") {
        return control_url.to_string();
    }

    match Url::parse(base).and_then(|b| b.join(control_url)) {
        Ok(url) => url.to_string(),
        Err(_) => control_url.to_string(),
    }
}

/// Texte (trimé) de l'enfant `suffix` de l'élément de réponse
pub(crate) fn child_text(response: &Element, suffix: &str) -> Option<String> {
    find_child_with_suffix(response, suffix)
        .and_then(|child| child.get_text())
        .map(|t| t.trim().to_string())
}

pub(crate) fn missing(action: &str, what: &str) -> DeviceControlError {
    DeviceControlError::status(action, 502, format!("missing {} in response", what))
}
