use ureq::Agent;

use super::{RENDERING_CONTROL_URN, child_text, missing};
use crate::errors::DeviceControlError;
use crate::soap_client::invoke_upnp_action;

#[derive(Debug, Clone)]
pub struct RenderingControlClient {
    agent: Agent,
    pub control_url: String,
    pub service_type: String,
}

impl RenderingControlClient {
    pub fn new(agent: Agent, control_url: String) -> Self {
        Self {
            agent,
            control_url,
            service_type: RENDERING_CONTROL_URN.to_string(),
        }
    }

    /// RenderingControl:1 — GetVolume (canal Master)
    pub fn get_volume(&self) -> Result<u8, DeviceControlError> {
        let action = "GetVolume";
        let envelope = invoke_upnp_action(
            &self.agent,
            &self.control_url,
            &self.service_type,
            action,
            &[("InstanceID", "0"), ("Channel", "Master")],
        )?
        .into_success(action)?;

        let response = envelope
            .body
            .child_with_suffix("GetVolumeResponse")
            .ok_or_else(|| missing(action, "GetVolumeResponse"))?;

        let text = child_text(response, "CurrentVolume").ok_or_else(|| missing(action, "CurrentVolume"))?;
        parse_volume(&text)
            .ok_or_else(|| DeviceControlError::status(action, 502, format!("invalid CurrentVolume value: {}", text)))
    }

    /// RenderingControl:1 — SetVolume (canal Master)
    pub fn set_volume(&self, volume: u8) -> Result<(), DeviceControlError> {
        let action = "SetVolume";
        let volume_str = volume.min(100).to_string();
        invoke_upnp_action(
            &self.agent,
            &self.control_url,
            &self.service_type,
            action,
            &[
                ("InstanceID", "0"),
                ("Channel", "Master"),
                ("DesiredVolume", volume_str.as_str()),
            ],
        )?
        .into_success(action)
        .map(|_| ())
    }
}

fn parse_volume(text: &str) -> Option<u8> {
    text.parse::<u16>().ok().map(|v| v.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume_clamps() {
        assert_eq!(parse_volume("42"), Some(42));
        assert_eq!(parse_volume("250"), Some(100));
        assert_eq!(parse_volume("loud"), None);
    }
}
