//! # Bridge : un sink, un renderer, un encodeur
//!
//! ```text
//! IDLE ──► ARMED ◄──► STREAMING
//!   │        │            │
//!   └────────┴─────┬──────┘
//!                  ▼
//!              STOPPING ──► CLOSED
//! ```
//!
//! `CLOSED` est terminal : le registre abandonne le bridge.

use std::fmt;

use serde::Serialize;

use crate::encoders::Encoder;
use crate::errors::BridgeError;
use crate::model::{DeviceId, SinkId};

/// Identifiant d'un bridge : la paire (sink, device)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BridgeId {
    pub sink: SinkId,
    pub device: DeviceId,
}

impl BridgeId {
    pub fn new(sink: SinkId, device: DeviceId) -> Self {
        Self { sink, device }
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.sink, self.device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BridgeState {
    Idle,
    Armed,
    Streaming,
    Stopping,
    Closed,
}

impl BridgeState {
    pub fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, Armed)
                | (Armed, Streaming)
                | (Streaming, Armed)
                | (Idle, Stopping)
                | (Armed, Stopping)
                | (Streaming, Stopping)
                | (Stopping, Closed)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Idle => "IDLE",
            BridgeState::Armed => "ARMED",
            BridgeState::Streaming => "STREAMING",
            BridgeState::Stopping => "STOPPING",
            BridgeState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Bridge {
    id: BridgeId,
    encoder: Option<Encoder>,
    path: Option<String>,
    state: BridgeState,
}

impl Bridge {
    pub fn new(id: BridgeId) -> Self {
        Self {
            id,
            encoder: None,
            path: None,
            state: BridgeState::Idle,
        }
    }

    pub fn id(&self) -> &BridgeId {
        &self.id
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn encoder(&self) -> Option<&Encoder> {
        self.encoder.as_ref()
    }

    /// Chemin HTTP publié, une fois le bridge armé
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// ARMED ou STREAMING : l'endpoint répond
    pub fn is_serving(&self) -> bool {
        matches!(self.state, BridgeState::Armed | BridgeState::Streaming)
    }

    /// Applique une transition, retourne l'état précédent.
    pub fn transition(&mut self, next: BridgeState) -> Result<BridgeState, BridgeError> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// IDLE → ARMED avec l'encodeur négocié ; retourne le chemin publié.
    pub fn arm(&mut self, encoder: Encoder) -> Result<&str, BridgeError> {
        self.transition(BridgeState::Armed)?;
        let path = stream_path(&self.id, encoder.suffix());
        self.encoder = Some(encoder);
        Ok(self.path.insert(path).as_str())
    }
}

/// `/stream/<sink>/<udn sans "uuid:">.<suffixe>`, segments url-encodés
pub fn stream_path(id: &BridgeId, suffix: &str) -> String {
    format!(
        "/stream/{}/{}.{}",
        urlencoding::encode(id.sink.as_str()),
        urlencoding::encode(id.device.short()),
        suffix
    )
}

/// Vue sérialisable d'un bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeSnapshot {
    pub sink: SinkId,
    pub device: DeviceId,
    pub sink_name: String,
    pub device_name: String,
    pub state: BridgeState,
    pub encoder: Option<String>,
    pub mime_type: Option<String>,
    pub url: Option<String>,
}
