use thiserror::Error;

use crate::bridge::BridgeState;

/// Erreurs liées au catalogue d'encodeurs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("unknown encoder \"{0}\"")]
    NotFound(String),

    #[error("{}", unsupported_bit_rate_message(.suffix, *.requested, .supported))]
    UnsupportedBitRate {
        suffix: String,
        requested: u32,
        supported: Vec<u32>,
    },

    #[error("encoder {suffix} is unavailable: {reason}")]
    EncoderUnavailable { suffix: String, reason: String },

    #[error("no usable encoder left")]
    NoEncoderAvailable,

    #[error("no compatible encoding for \"{device}\" (device accepts {accepted})")]
    NoCompatibleEncoding { device: String, accepted: String },
}

fn unsupported_bit_rate_message(suffix: &str, requested: u32, supported: &[u32]) -> String {
    if supported.is_empty() {
        format!("encoder {} does not support setting a bit rate", suffix)
    } else {
        let list = supported
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "bit rate {} is not supported by encoder {}; supported bit rates are \"{}\"",
            requested, suffix, list
        )
    }
}

/// Erreurs des plugins lors de la description d'un device
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    #[error("cannot fetch description at {location}: {reason}")]
    DescriptionFetch { location: String, reason: String },

    #[error("cannot parse description at {location}: {reason}")]
    DescriptionParse { location: String, reason: String },

    #[error("{location} is not a supported renderer: {reason}")]
    NotARenderer { location: String, reason: String },
}

impl PluginError {
    pub fn fetch(location: &str, reason: impl ToString) -> Self {
        PluginError::DescriptionFetch {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(location: &str, reason: impl ToString) -> Self {
        PluginError::DescriptionParse {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn not_a_renderer(location: &str, reason: impl ToString) -> Self {
        PluginError::NotARenderer {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Échec d'une commande de contrôle (play, stop, volume).
///
/// Les codes suivent la sémantique HTTP : seul 200 signifie que le
/// renderer a accusé réception.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceControlError {
    #[error("{action} failed with status {status}: {detail}")]
    Status {
        action: String,
        status: u16,
        detail: String,
    },

    #[error("{action} failed: {reason}")]
    Transport { action: String, reason: String },

    #[error("{action} is not supported by this renderer")]
    Unsupported { action: String },
}

impl DeviceControlError {
    pub fn status(action: &str, status: u16, detail: impl ToString) -> Self {
        DeviceControlError::Status {
            action: action.to_string(),
            status,
            detail: detail.to_string(),
        }
    }

    pub fn transport(action: &str, reason: impl ToString) -> Self {
        DeviceControlError::Transport {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(action: &str) -> Self {
        DeviceControlError::Unsupported {
            action: action.to_string(),
        }
    }

    /// Code de statut HTTP équivalent, `None` pour une erreur de transport
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeviceControlError::Status { status, .. } => Some(*status),
            DeviceControlError::Unsupported { .. } => Some(501),
            DeviceControlError::Transport { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("illegal bridge transition {from} -> {to}")]
    InvalidTransition { from: BridgeState, to: BridgeState },
}

/// Erreurs de la découverte SSDP
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("SSDP socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("discovery worker failed: {0}")]
    Worker(String),
}

/// Erreurs de l'observation des sinks
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("cannot run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Failed { command: String, status: String },
}

/// Erreurs du serveur de flux
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream is closed")]
    Closed,

    #[error("cannot start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Erreurs renvoyées aux appelants du registre
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown renderer {0}")]
    UnknownDevice(String),

    #[error("unknown bridge {0}")]
    UnknownBridge(String),

    #[error(transparent)]
    Control(#[from] DeviceControlError),

    #[error("registry is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_bit_rate_lists_rates() {
        let err = EncoderError::UnsupportedBitRate {
            suffix: "mp3".into(),
            requested: 100,
            supported: vec![128, 192],
        };
        assert_eq!(
            err.to_string(),
            "bit rate 100 is not supported by encoder mp3; supported bit rates are \"128,192\""
        );
    }

    #[test]
    fn test_unsupported_bit_rate_without_range() {
        let err = EncoderError::UnsupportedBitRate {
            suffix: "wav".into(),
            requested: 192,
            supported: vec![],
        };
        assert_eq!(err.to_string(), "encoder wav does not support setting a bit rate");
    }

    #[test]
    fn test_control_error_status_code() {
        assert_eq!(DeviceControlError::status("Play", 500, "fault").status_code(), Some(500));
        assert_eq!(DeviceControlError::transport("Stop", "timeout").status_code(), None);
    }
}
