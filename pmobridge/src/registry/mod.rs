//! # Registre des renderers
//!
//! Seul propriétaire de l'état partagé : devices, sinks, bridges et
//! endpoints. Toute mutation passe par un canal `mpsc` non borné traité
//! dans l'ordre par une unique tâche ; les autres composants n'ont qu'un
//! [`RegistryHandle`].
//!
//! Les appels réseau vers les renderers (`play`, `stop`, volume,
//! description) s'exécutent dans `spawn_blocking` et leurs résultats
//! reviennent sous forme d'événements.
//!
//! Un renderer ne joue qu'un flux à la fois : quand plusieurs sinks lui
//! sont pontés, seul le premier bridge reçoit `play`, les autres restent
//! ARMED. À la fermeture du bridge joué, le renderer passe au bridge
//! suivant, et `stop` n'est envoyé que s'il n'en reste aucun.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::bridge::{Bridge, BridgeId, BridgeSnapshot, BridgeState};
use crate::encoders::Encoder;
use crate::errors::{DeviceControlError, RegistryError};
use crate::model::{DeviceDescriptor, DeviceId, PlaybackState, SampleFormat, Sink, SinkId};
use crate::plugins::PluginSet;
use crate::stream::{HubActivity, PipelineFactory, StreamHub};

/// Paramètres fixes du registre
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Sous-chaînes acceptées dans le nom des renderers (vide = tous)
    pub device_filter: Vec<String>,
    /// Sous-chaînes acceptées dans le nom ou l'id des sinks (vide = tous)
    pub sink_filter: Vec<String>,
    /// URL publique du serveur de flux (`http://host:port`)
    pub base_url: String,
    /// Encodeurs validés, du plus préféré au moins préféré
    pub encoders: Vec<Encoder>,
}

/// Filtre de nom : accepte si aucun filtre ou si le nom contient au
/// moins une des sous-chaînes (sensible à la casse).
pub fn name_accepted(filter: &[String], name: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| name.contains(f.as_str()))
}

fn status_label(error: &DeviceControlError) -> String {
    error
        .status_code()
        .map_or_else(|| "transport".to_string(), |code| code.to_string())
}

enum Command {
    DeviceFound(DeviceDescriptor),
    DeviceLost(DeviceId),
    SinkAdded(Sink),
    SinkRemoved(SinkId),
    SinkUpdated {
        id: SinkId,
        format: SampleFormat,
    },
    AddRendererByUrl(String),
    ListRenderers(oneshot::Sender<Vec<DeviceDescriptor>>),
    ListBridges(oneshot::Sender<Vec<BridgeSnapshot>>),
    OpenStream {
        path: String,
        reply: oneshot::Sender<Option<Arc<StreamHub>>>,
    },
    StopBridge {
        id: BridgeId,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    GetVolume {
        id: DeviceId,
        reply: oneshot::Sender<Result<u8, RegistryError>>,
    },
    SetVolume {
        id: DeviceId,
        volume: u8,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Shutdown {
        grace: Duration,
        reply: oneshot::Sender<()>,
    },
    // événements internes
    Stream {
        id: BridgeId,
        activity: HubActivity,
    },
    PlayCompleted {
        id: BridgeId,
        result: Result<(), DeviceControlError>,
    },
    StopCompleted {
        device: DeviceId,
        result: Result<(), DeviceControlError>,
    },
}

/// Accès clonable au registre
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RegistryHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Registry is gone, event dropped");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).ok()?;
        rx.await.ok()
    }

    pub fn device_found(&self, device: DeviceDescriptor) {
        self.send(Command::DeviceFound(device));
    }

    pub fn device_lost(&self, id: DeviceId) {
        self.send(Command::DeviceLost(id));
    }

    pub fn sink_added(&self, sink: Sink) {
        self.send(Command::SinkAdded(sink));
    }

    pub fn sink_removed(&self, id: SinkId) {
        self.send(Command::SinkRemoved(id));
    }

    pub fn sink_updated(&self, id: SinkId, format: SampleFormat) {
        self.send(Command::SinkUpdated { id, format });
    }

    /// Décrit le device à `url` sans passer par SSDP
    pub fn add_renderer_by_url(&self, url: impl Into<String>) {
        self.send(Command::AddRendererByUrl(url.into()));
    }

    pub async fn list_renderers(&self) -> Vec<DeviceDescriptor> {
        self.request(Command::ListRenderers).await.unwrap_or_default()
    }

    pub async fn list_bridges(&self) -> Vec<BridgeSnapshot> {
        self.request(Command::ListBridges).await.unwrap_or_default()
    }

    /// Hub du bridge publié à `path`, s'il est ARMED ou STREAMING
    pub async fn open_stream(&self, path: &str) -> Option<Arc<StreamHub>> {
        let path = path.to_string();
        self.request(|reply| Command::OpenStream { path, reply })
            .await
            .flatten()
    }

    pub async fn stop_bridge(&self, id: BridgeId) -> Result<(), RegistryError> {
        self.request(|reply| Command::StopBridge { id, reply })
            .await
            .unwrap_or(Err(RegistryError::Closed))
    }

    pub async fn get_volume(&self, id: DeviceId) -> Result<u8, RegistryError> {
        self.request(|reply| Command::GetVolume { id, reply })
            .await
            .unwrap_or(Err(RegistryError::Closed))
    }

    pub async fn set_volume(&self, id: DeviceId, volume: u8) -> Result<(), RegistryError> {
        self.request(|reply| Command::SetVolume { id, volume, reply })
            .await
            .unwrap_or(Err(RegistryError::Closed))
    }

    /// Ferme tous les bridges puis arrête la boucle.
    ///
    /// Les `stop` en cours sont attendus au plus `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.request(|reply| Command::Shutdown { grace, reply }).await;
    }
}

struct BridgeEntry {
    bridge: Bridge,
    hub: Option<Arc<StreamHub>>,
}

pub struct Registry {
    options: RegistryOptions,
    plugins: PluginSet,
    factory: Arc<dyn PipelineFactory>,
    tx: mpsc::UnboundedSender<Command>,
    devices: BTreeMap<DeviceId, DeviceDescriptor>,
    sinks: BTreeMap<SinkId, Sink>,
    bridges: BTreeMap<BridgeId, BridgeEntry>,
    endpoints: HashMap<String, BridgeId>,
    /// Paires sans encodage commun, signalées une seule fois
    incompatible: HashSet<BridgeId>,
    /// Devices écartés par le filtre, signalés une seule fois
    filtered: HashSet<DeviceId>,
    /// Bridge dont l'URL a été envoyée à chaque renderer
    playing: HashMap<DeviceId, BridgeId>,
    pending: JoinSet<()>,
}

impl Registry {
    /// Lance la boucle du registre et retourne son handle.
    pub fn spawn(
        options: RegistryOptions,
        plugins: PluginSet,
        factory: Arc<dyn PipelineFactory>,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Registry {
            options,
            plugins,
            factory,
            tx: tx.clone(),
            devices: BTreeMap::new(),
            sinks: BTreeMap::new(),
            bridges: BTreeMap::new(),
            endpoints: HashMap::new(),
            incompatible: HashSet::new(),
            filtered: HashSet::new(),
            playing: HashMap::new(),
            pending: JoinSet::new(),
        };
        let join = tokio::spawn(registry.run(rx));
        (RegistryHandle { tx }, join)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("✅ Renderer registry started");
        while let Some(command) = rx.recv().await {
            if let Command::Shutdown { grace, reply } = command {
                self.shutdown(grace).await;
                let _ = reply.send(());
                break;
            }
            self.handle(command);
            while self.pending.try_join_next().is_some() {}
        }
        info!("Renderer registry stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::DeviceFound(device) => self.on_device_found(device),
            Command::DeviceLost(id) => self.on_device_lost(&id),
            Command::SinkAdded(sink) => self.on_sink_added(sink),
            Command::SinkRemoved(id) => self.on_sink_removed(&id),
            Command::SinkUpdated { id, format } => self.on_sink_updated(&id, format),
            Command::AddRendererByUrl(url) => self.add_renderer_by_url(url),
            Command::ListRenderers(reply) => {
                let _ = reply.send(self.devices.values().cloned().collect());
            }
            Command::ListBridges(reply) => {
                let _ = reply.send(self.snapshots());
            }
            Command::OpenStream { path, reply } => {
                let _ = reply.send(self.open_stream(&path));
            }
            Command::StopBridge { id, reply } => {
                let result = if self.bridges.contains_key(&id) {
                    self.close_bridge(&id, "stopped by request");
                    self.settle_renderer(&id.device);
                    Ok(())
                } else {
                    Err(RegistryError::UnknownBridge(id.to_string()))
                };
                let _ = reply.send(result);
            }
            Command::GetVolume { id, reply } => self.get_volume(id, reply),
            Command::SetVolume { id, volume, reply } => self.set_volume(id, volume, reply),
            Command::Shutdown { reply, .. } => {
                let _ = reply.send(());
            }
            Command::Stream { id, activity } => self.on_stream_activity(&id, activity),
            Command::PlayCompleted { id, result } => self.on_play_completed(&id, result),
            Command::StopCompleted { device, result } => self.on_stop_completed(&device, result),
        }
    }

    fn on_device_found(&mut self, device: DeviceDescriptor) {
        if !name_accepted(&self.options.device_filter, &device.name) {
            if self.filtered.insert(device.id.clone()) {
                info!("🚫 Skipping renderer \"{}\" ({}): filtered out", device.name, device.id);
            }
            return;
        }

        if let Some(known) = self.devices.get_mut(&device.id) {
            trace!("Renderer {} seen again", device.id);
            known.last_seen = device.last_seen;
            if known.location != device.location {
                debug!("Renderer {} moved to {}", device.id, device.location);
                known.location = device.location;
                known.endpoints = device.endpoints;
            }
            return;
        }

        info!(
            "🔍 New {} renderer \"{}\" ({}) accepting {}",
            device.flavour,
            device.name,
            device.id,
            device.mime_types.join(", ")
        );
        let id = device.id.clone();
        self.devices.insert(id.clone(), device);

        let sinks: Vec<SinkId> = self.sinks.keys().cloned().collect();
        for sink in sinks {
            self.create_bridge(BridgeId::new(sink, id.clone()));
        }
    }

    fn on_device_lost(&mut self, id: &DeviceId) {
        self.filtered.remove(id);
        if !self.devices.contains_key(id) {
            return;
        }

        for bridge in self.bridges_matching(|b| &b.device == id) {
            self.close_bridge(&bridge, "renderer lost");
        }
        self.settle_renderer(id);
        self.incompatible.retain(|b| &b.device != id);

        if let Some(device) = self.devices.remove(id) {
            info!("👋 Renderer \"{}\" ({}) is gone", device.name, id);
        }
    }

    fn on_sink_added(&mut self, sink: Sink) {
        let accepted = name_accepted(&self.options.sink_filter, &sink.name)
            || name_accepted(&self.options.sink_filter, sink.id.as_str());
        if !accepted {
            debug!("Skipping sink \"{}\" ({}): filtered out", sink.name, sink.id);
            return;
        }

        if self.sinks.contains_key(&sink.id) {
            let id = sink.id.clone();
            self.on_sink_updated(&id, sink.format);
            return;
        }

        info!("🔈 New sink \"{}\" ({}, {})", sink.name, sink.id, sink.format);
        let id = sink.id.clone();
        self.sinks.insert(id.clone(), sink);

        let devices: Vec<DeviceId> = self.devices.keys().cloned().collect();
        for device in devices {
            self.create_bridge(BridgeId::new(id.clone(), device));
        }
    }

    fn on_sink_removed(&mut self, id: &SinkId) {
        if self.sinks.remove(id).is_none() {
            return;
        }
        info!("🔇 Sink {} removed", id);

        let closed = self.bridges_matching(|b| &b.sink == id);
        for bridge in &closed {
            self.close_bridge(bridge, "sink removed");
        }
        for bridge in &closed {
            self.settle_renderer(&bridge.device);
        }
        self.incompatible.retain(|b| &b.sink != id);
    }

    fn on_sink_updated(&mut self, id: &SinkId, format: SampleFormat) {
        let Some(sink) = self.sinks.get_mut(id) else {
            return;
        };
        if sink.format == format {
            return;
        }
        debug!("Sink {} format changed to {}", id, format);
        sink.format = format;
        let sink = sink.clone();

        for entry in self.bridges.values().filter(|e| &e.bridge.id().sink == id) {
            if let Some(hub) = &entry.hub {
                hub.update_sink(sink.clone());
            }
        }
    }

    /// IDLE → ARMED (ou IDLE → STOPPING → CLOSED si aucun encodage ne convient)
    fn create_bridge(&mut self, id: BridgeId) {
        if self.bridges.contains_key(&id) {
            return;
        }
        let (Some(sink), Some(device)) = (self.sinks.get(&id.sink), self.devices.get(&id.device)) else {
            return;
        };
        let Some(plugin) = self.plugins.for_flavour(device.flavour) else {
            warn!("No plugin for {} renderer {}", device.flavour, device.id);
            return;
        };

        let mut bridge = Bridge::new(id.clone());

        let encoder = match plugin.negotiate_encoding(device, &self.options.encoders) {
            Ok(encoder) => encoder,
            Err(e) => {
                if self.incompatible.insert(id.clone()) {
                    warn!("⚠️ Cannot bridge {}: {}", id, e);
                }
                let _ = bridge.transition(BridgeState::Stopping);
                let _ = bridge.transition(BridgeState::Closed);
                return;
            }
        };

        let path = match bridge.arm(encoder.clone()) {
            Ok(path) => path.to_string(),
            Err(e) => {
                warn!("Bridge {} not armed: {}", id, e);
                return;
            }
        };

        let tx = self.tx.clone();
        let hub_id = id.clone();
        let hub = StreamHub::new(
            id.clone(),
            sink.clone(),
            encoder.clone(),
            self.factory.clone(),
            Arc::new(move |activity| {
                let _ = tx.send(Command::Stream {
                    id: hub_id.clone(),
                    activity,
                });
            }),
        );

        let url = format!("{}{}", self.options.base_url, path);
        info!(
            "🔗 Bridge {} armed: \"{}\" -> \"{}\" as {} at {}",
            id, sink.name, device.name, encoder, url
        );

        self.endpoints.insert(path, id.clone());
        self.bridges.insert(
            id.clone(),
            BridgeEntry {
                bridge,
                hub: Some(hub),
            },
        );

        match self.playing.get(&id.device) {
            Some(current) => debug!(
                "Renderer {} already plays {}, bridge {} stays armed",
                id.device, current, id
            ),
            None => self.start_playback(id),
        }
    }

    /// Envoie l'URL du bridge à son renderer.
    fn start_playback(&mut self, id: BridgeId) {
        let Some(entry) = self.bridges.get(&id) else {
            return;
        };
        let (Some(path), Some(encoder)) = (entry.bridge.path(), entry.bridge.encoder()) else {
            return;
        };
        let Some((device, plugin)) = self.control_target(&id.device) else {
            return;
        };
        let url = format!("{}{}", self.options.base_url, path);
        let encoder = encoder.clone();

        self.playing.insert(id.device.clone(), id.clone());
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = plugin.play(&device, &url, &encoder);
            let _ = tx.send(Command::PlayCompleted { id, result });
        });
    }

    /// À appeler après la fermeture de bridges vers `device` : le renderer
    /// passe au bridge suivant ou reçoit `stop` s'il n'en reste aucun.
    fn settle_renderer(&mut self, device: &DeviceId) {
        if let Some(current) = self.playing.get(device) {
            if self.bridges.contains_key(current) {
                return;
            }
        }
        let was_playing = self.playing.remove(device).is_some();

        match self.bridges.keys().find(|b| &b.device == device).cloned() {
            Some(next) => {
                info!("🔁 Renderer {} switches to bridge {}", device, next);
                self.start_playback(next);
            }
            None if was_playing => self.stop_renderer(device),
            None => {}
        }
    }

    /// `stop` best-effort, suivi dans `pending` pour l'arrêt
    fn stop_renderer(&mut self, id: &DeviceId) {
        let Some((device, plugin)) = self.control_target(id) else {
            return;
        };
        let tx = self.tx.clone();
        self.pending.spawn_blocking(move || {
            let result = plugin.stop(&device);
            let _ = tx.send(Command::StopCompleted {
                device: device.id.clone(),
                result,
            });
        });
    }

    /// any → STOPPING → CLOSED. Le renderer n'est pas contacté ici, voir
    /// [`Registry::settle_renderer`].
    fn close_bridge(&mut self, id: &BridgeId, reason: &str) {
        let Some(mut entry) = self.bridges.remove(id) else {
            return;
        };

        if let Err(e) = entry.bridge.transition(BridgeState::Stopping) {
            warn!("Bridge {}: {}", id, e);
        }
        if let Some(path) = entry.bridge.path() {
            self.endpoints.remove(path);
        }
        if let Some(hub) = entry.hub.take() {
            hub.close();
        }

        if let Err(e) = entry.bridge.transition(BridgeState::Closed) {
            warn!("Bridge {}: {}", id, e);
        }
        info!("🔌 Bridge {} closed ({})", id, reason);
    }

    fn bridges_matching(&self, pred: impl Fn(&BridgeId) -> bool) -> Vec<BridgeId> {
        self.bridges.keys().filter(|id| pred(id)).cloned().collect()
    }

    fn open_stream(&self, path: &str) -> Option<Arc<StreamHub>> {
        let id = self.endpoints.get(path)?;
        let entry = self.bridges.get(id)?;
        if !entry.bridge.is_serving() {
            return None;
        }
        entry.hub.clone()
    }

    fn on_stream_activity(&mut self, id: &BridgeId, activity: HubActivity) {
        let Some(entry) = self.bridges.get_mut(id) else {
            return;
        };
        let next = match activity {
            HubActivity::Started => BridgeState::Streaming,
            HubActivity::Stopped => BridgeState::Armed,
        };
        match entry.bridge.transition(next) {
            Ok(_) => info!("Bridge {} is now {}", id, next),
            Err(e) => debug!("Bridge {}: {}", id, e),
        }
    }

    fn on_play_completed(&mut self, id: &BridgeId, result: Result<(), DeviceControlError>) {
        match result {
            Ok(()) => {
                // Réponse tardive d'un bridge fermé ou remplacé
                if self.playing.get(&id.device) != Some(id) {
                    return;
                }
                if let Some(device) = self.devices.get_mut(&id.device) {
                    device.state = PlaybackState::Playing;
                }
            }
            // Le bridge reste ARMED : le renderer peut encore venir chercher le flux
            Err(e) => warn!(
                "❌ Play failed for bridge {} (status {}): {}",
                id,
                status_label(&e),
                e
            ),
        }
    }

    fn on_stop_completed(&mut self, id: &DeviceId, result: Result<(), DeviceControlError>) {
        match result {
            Ok(()) => {
                if self.playing.contains_key(id) {
                    return;
                }
                if let Some(device) = self.devices.get_mut(id) {
                    device.state = PlaybackState::Stopped;
                }
            }
            Err(e) => warn!(
                "⚠️ Stop failed for {} (status {}, not retried): {}",
                id,
                status_label(&e),
                e
            ),
        }
    }

    fn get_volume(&self, id: DeviceId, reply: oneshot::Sender<Result<u8, RegistryError>>) {
        let Some((device, plugin)) = self.control_target(&id) else {
            let _ = reply.send(Err(RegistryError::UnknownDevice(id.to_string())));
            return;
        };
        tokio::task::spawn_blocking(move || {
            let _ = reply.send(plugin.get_volume(&device).map_err(RegistryError::from));
        });
    }

    fn set_volume(&self, id: DeviceId, volume: u8, reply: oneshot::Sender<Result<(), RegistryError>>) {
        let Some((device, plugin)) = self.control_target(&id) else {
            let _ = reply.send(Err(RegistryError::UnknownDevice(id.to_string())));
            return;
        };
        tokio::task::spawn_blocking(move || {
            let _ = reply.send(plugin.set_volume(&device, volume).map_err(RegistryError::from));
        });
    }

    fn control_target(
        &self,
        id: &DeviceId,
    ) -> Option<(DeviceDescriptor, Arc<dyn crate::plugins::RendererPlugin>)> {
        let device = self.devices.get(id)?.clone();
        let plugin = self.plugins.for_flavour(device.flavour)?;
        Some((device, plugin))
    }

    fn add_renderer_by_url(&self, url: String) {
        let plugins = self.plugins.clone();
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || match plugins.describe_url(&url) {
            Ok(device) => {
                let _ = tx.send(Command::DeviceFound(device));
            }
            Err(e) => warn!("❌ Cannot add renderer at {}: {}", url, e),
        });
    }

    fn snapshots(&self) -> Vec<BridgeSnapshot> {
        self.bridges
            .values()
            .map(|entry| {
                let id = entry.bridge.id();
                let encoder = entry.bridge.encoder();
                BridgeSnapshot {
                    sink: id.sink.clone(),
                    device: id.device.clone(),
                    sink_name: self
                        .sinks
                        .get(&id.sink)
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    device_name: self
                        .devices
                        .get(&id.device)
                        .map(|d| d.name.clone())
                        .unwrap_or_default(),
                    state: entry.bridge.state(),
                    encoder: encoder.map(|e| e.suffix().to_string()),
                    mime_type: encoder.map(|e| e.mime_type().to_string()),
                    url: entry
                        .bridge
                        .path()
                        .map(|p| format!("{}{}", self.options.base_url, p)),
                }
            })
            .collect()
    }

    async fn shutdown(&mut self, grace: Duration) {
        info!("🛑 Closing {} bridge(s)", self.bridges.len());
        let ids: Vec<BridgeId> = self.bridges.keys().cloned().collect();
        for id in &ids {
            self.close_bridge(id, "shutdown");
        }
        let devices: BTreeSet<DeviceId> = ids.into_iter().map(|id| id.device).collect();
        for device in &devices {
            self.settle_renderer(device);
        }

        let pending = &mut self.pending;
        let drained = tokio::time::timeout(grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("⚠️ {} stop command(s) still pending after {:?}", self.pending.len(), grace);
            self.pending.detach_all();
        }
    }
}
