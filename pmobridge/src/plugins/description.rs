//! Récupération et parsing des `description.xml` UPnP

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::{Reader, events::Event};
use tracing::debug;
use ureq::Agent;

use crate::errors::PluginError;

/// Service déclaré dans le `serviceList` d'un device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_type: String,
    pub control_url: String,
}

/// Champs utiles d'une description de device.
///
/// Les champs d'identité sont ceux du device racine ; les services sont
/// collectés sur tout l'arbre (un MediaRenderer peut être embarqué).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub udn: Option<String>,
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub url_base: Option<String>,
    pub services: Vec<ServiceEntry>,
}

impl DeviceDescription {
    /// Premier service dont le type contient `fragment`
    /// (ex: `":service:AVTransport:"`).
    pub fn service(&self, fragment: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.service_type.contains(fragment))
    }

    /// Base de résolution des URLs de contrôle
    pub fn base<'a>(&'a self, location: &'a str) -> &'a str {
        self.url_base
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(location)
    }
}

/// Télécharge et parse la description à `location`.
pub fn fetch_description(agent: &Agent, location: &str) -> Result<DeviceDescription, PluginError> {
    debug!("Fetching description at {}", location);

    let mut response = agent
        .get(location)
        .call()
        .map_err(|e| PluginError::fetch(location, e))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(PluginError::fetch(location, format!("HTTP status {}", status)));
    }

    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| PluginError::fetch(location, e))?;

    parse_description(&body, location)
}

pub fn parse_description(xml: &str, location: &str) -> Result<DeviceDescription, PluginError> {
    let mut reader = Reader::from_str(xml);
    let mut parsed = DeviceDescription::default();

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut service: Option<ServiceEntry> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            PluginError::parse(location, format!("{} at byte {}", e, reader.error_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "service" {
                    service = Some(ServiceEntry::default());
                }
                stack.push(name);
                text.clear();
            }
            Event::Text(e) => {
                let decoded = e.decode().map_err(|e| PluginError::parse(location, e))?;
                text.push_str(&decoded);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::GeneralRef(e) => {
                if let Ok(Some(c)) = e.resolve_char_ref() {
                    text.push(c);
                } else {
                    let name = e.decode().map_err(|e| PluginError::parse(location, e))?;
                    match resolve_predefined_entity(&name) {
                        Some(resolved) => text.push_str(resolved),
                        None => {
                            text.push('&');
                            text.push_str(&name);
                            text.push(';');
                        }
                    }
                }
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let value = text.trim().to_string();
                text.clear();

                match (stack.last().map(String::as_str), name.as_str()) {
                    (Some("device"), field) => {
                        let slot = match field {
                            "UDN" => &mut parsed.udn,
                            "deviceType" => &mut parsed.device_type,
                            "friendlyName" => &mut parsed.friendly_name,
                            "manufacturer" => &mut parsed.manufacturer,
                            "modelName" => &mut parsed.model_name,
                            _ => continue,
                        };
                        if slot.is_none() && !value.is_empty() {
                            *slot = Some(value);
                        }
                    }
                    (Some("root"), "URLBase") => {
                        if !value.is_empty() {
                            parsed.url_base = Some(value);
                        }
                    }
                    (Some("service"), "serviceType") => {
                        if let Some(s) = service.as_mut() {
                            s.service_type = value;
                        }
                    }
                    (Some("service"), "controlURL") => {
                        if let Some(s) = service.as_mut() {
                            s.control_url = value;
                        }
                    }
                    (_, "service") => {
                        if let Some(s) = service.take() {
                            if !s.service_type.is_empty() && !s.control_url.is_empty() {
                                parsed.services.push(s);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if parsed.udn.is_none() && parsed.device_type.is_none() {
        return Err(PluginError::parse(location, "no <device> element"));
    }

    Ok(parsed)
}
