use ureq::Agent;

use super::{CONNECTION_MANAGER_URN, child_text, missing};
use crate::errors::DeviceControlError;
use crate::soap_client::invoke_upnp_action;

#[derive(Debug, Clone)]
pub struct ConnectionManagerClient {
    agent: Agent,
    pub control_url: String,
    pub service_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Liste brute des protocolInfo "source" (séparés par virgule dans UPnP)
    pub source: Vec<String>,
    /// Liste brute des protocolInfo "sink"
    pub sink: Vec<String>,
}

impl ProtocolInfo {
    /// Types MIME acceptés en lecture, extraits des protocolInfo "sink"
    /// (`http-get:*:audio/mpeg:*` → `audio/mpeg`), sans doublon.
    pub fn sink_mime_types(&self) -> Vec<String> {
        let mut mimes: Vec<String> = Vec::new();
        for entry in &self.sink {
            let mut parts = entry.split(':');
            let (Some(_protocol), Some(_network), Some(mime)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let mime = mime.trim().to_ascii_lowercase();
            if mime.is_empty() || mime == "*" || mimes.contains(&mime) {
                continue;
            }
            mimes.push(mime);
        }
        mimes
    }
}

impl ConnectionManagerClient {
    pub fn new(agent: Agent, control_url: String) -> Self {
        Self {
            agent,
            control_url,
            service_type: CONNECTION_MANAGER_URN.to_string(),
        }
    }

    /// GetProtocolInfo
    pub fn get_protocol_info(&self) -> Result<ProtocolInfo, DeviceControlError> {
        let action = "GetProtocolInfo";
        let envelope = invoke_upnp_action(&self.agent, &self.control_url, &self.service_type, action, &[])?
            .into_success(action)?;

        let response = envelope
            .body
            .child_with_suffix("GetProtocolInfoResponse")
            .ok_or_else(|| missing(action, "GetProtocolInfoResponse"))?;

        Ok(ProtocolInfo {
            source: split_list(&child_text(response, "Source").unwrap_or_default()),
            sink: split_list(&child_text(response, "Sink").unwrap_or_default()),
        })
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
