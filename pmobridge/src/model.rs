//! Types partagés entre la découverte, le registre et les plugins

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifiant unique d'un renderer (UDN, ex: `uuid:5f9ec1b3-...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(udn: impl Into<String>) -> Self {
        Self(udn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UDN sans le préfixe `uuid:`, utilisé dans les chemins de flux
    pub fn short(&self) -> &str {
        self.0.strip_prefix("uuid:").unwrap_or(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Famille de renderer, une par plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavour {
    Dlna,
    Chromecast,
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavour::Dlna => f.write_str("DLNA"),
            Flavour::Chromecast => f.write_str("Chromecast"),
        }
    }
}

/// État de lecture tel qu'acquitté par le renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Unknown,
}

/// Points de contrôle d'un renderer.
///
/// Les URLs sont absolues (résolues contre `URLBase` ou la location).
/// Pour un Chromecast, seuls `host` et `port` sont renseignés.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControlEndpoints {
    pub avtransport: Option<String>,
    pub rendering_control: Option<String>,
    pub connection_manager: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub flavour: Flavour,
    pub location: String,
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
    pub endpoints: ControlEndpoints,
    pub mime_types: Vec<String>,
    pub state: PlaybackState,
    pub last_seen: DateTime<Utc>,
}

impl DeviceDescriptor {
    pub fn new(id: DeviceId, name: impl Into<String>, flavour: Flavour, location: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            flavour,
            location: location.into(),
            model_name: None,
            manufacturer: None,
            endpoints: ControlEndpoints::default(),
            mime_types: Vec::new(),
            state: PlaybackState::Unknown,
            last_seen: Utc::now(),
        }
    }

    pub fn with_mime_types<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = mimes.into_iter().map(Into::into).collect();
        self
    }
}

/// Format PCM brut d'un sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleFormat {
    pub rate: u32,
    pub channels: u8,
    pub bits: u8,
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self {
            rate: 44_100,
            channels: 2,
            bits: 16,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}le {}ch {}Hz", self.bits, self.channels, self.rate)
    }
}

/// Nom PulseAudio du sink (ex: `alsa_output.pci-0000_00_1f.3.analog-stereo`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SinkId(String);

impl SinkId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SinkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sink {
    pub id: SinkId,
    pub name: String,
    pub format: SampleFormat,
    pub live: bool,
}

impl Sink {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: SinkId::new(id),
            name: name.into(),
            format: SampleFormat::default(),
            live: true,
        }
    }
}

/// Annonce brute issue de SSDP (ou d'une URL fournie par l'opérateur)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub usn: String,
    pub udn: Option<String>,
    /// `NT` d'un NOTIFY ou `ST` d'une réponse de recherche
    pub target: String,
    pub location: String,
    pub server: String,
    pub max_age: u32,
}

impl Announcement {
    /// Annonce synthétique pour une URL de description donnée
    pub fn from_location(location: impl Into<String>) -> Self {
        Self {
            usn: String::new(),
            udn: None,
            target: String::new(),
            location: location.into(),
            server: String::new(),
            max_age: 0,
        }
    }
}
