//! # pmobridge - pont entre sinks PulseAudio et renderers réseau
//!
//! ```text
//! SSDP ──► discovery ──► registry ◄── sinks (pactl)
//!                          │
//!                 bridges (sink × renderer × encodeur)
//!                          │
//!             /stream/... (HTTP) ◄── renderer
//! ```
//!
//! - [`registry`] : seul propriétaire de l'état, boucle d'événements
//! - [`plugins`] : familles de renderers (DLNA, Chromecast)
//! - [`encoders`] : catalogue des encodages et négociation
//! - [`stream`] : hubs de diffusion et route HTTP des flux
//! - [`discovery`] / [`sinks`] : sources d'événements du registre
//! - [`api`] : supervision JSON

pub mod api;
pub mod bridge;
pub mod discovery;
pub mod encoders;
pub mod errors;
pub mod model;
pub mod plugins;
pub mod registry;
pub mod sinks;
pub mod soap_client;
pub mod stream;
pub mod upnp_clients;

pub use api::api_router;
pub use bridge::{Bridge, BridgeId, BridgeSnapshot, BridgeState};
pub use discovery::Discovery;
pub use encoders::{Encoder, list_encoders, prepare_encoders};
pub use errors::*;
pub use model::{DeviceDescriptor, DeviceId, Flavour, PlaybackState, SampleFormat, Sink, SinkId};
pub use plugins::{PluginSet, RendererPlugin};
pub use registry::{Registry, RegistryHandle, RegistryOptions};
pub use sinks::{PactlWatcher, SinkWatcher, watch_sinks};
pub use stream::{Pipeline, PipelineFactory, ProcessPipelineFactory, stream_router};
