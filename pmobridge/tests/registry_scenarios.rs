use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use pmobridge::encoders::select_by_suffix;
use pmobridge::model::Announcement;
use pmobridge::plugins::DeviceDescription;
use pmobridge::{
    BridgeSnapshot, BridgeState, DeviceControlError, DeviceDescriptor, DeviceId, Encoder, Flavour,
    Pipeline, PipelineFactory, PlaybackState, PluginError, PluginSet, Registry, RegistryHandle,
    RegistryOptions, RendererPlugin, Sink, StreamError, api_router, stream_router,
};
use tokio::io::DuplexStream;
use tower::ServiceExt;

const BASE_URL: &str = "http://192.168.1.10:8080";
const PAYLOAD: &[u8] = b"ID3-fake-mp3-frames";

#[derive(Default)]
struct FakePlugin {
    plays: Mutex<Vec<(String, String)>>,
    stops: Mutex<Vec<String>>,
    volume: AtomicU8,
    refuse_play: AtomicBool,
}

impl FakePlugin {
    fn plays(&self) -> Vec<(String, String)> {
        self.plays.lock().unwrap().clone()
    }

    fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

impl RendererPlugin for FakePlugin {
    fn flavour(&self) -> Flavour {
        Flavour::Dlna
    }

    fn search_target(&self) -> &'static str {
        "urn:schemas-upnp-org:device:MediaRenderer:1"
    }

    fn matches(&self, _: &Announcement) -> bool {
        false
    }

    fn describe(&self, a: &Announcement) -> Result<DeviceDescriptor, PluginError> {
        Err(PluginError::fetch(&a.location, "no network in tests"))
    }

    fn accept_description(
        &self,
        description: &DeviceDescription,
        location: &str,
    ) -> Result<DeviceDescriptor, PluginError> {
        let udn = description
            .udn
            .clone()
            .ok_or_else(|| PluginError::parse(location, "missing UDN"))?;
        let name = description.friendly_name.clone().unwrap_or_else(|| udn.clone());
        Ok(DeviceDescriptor::new(DeviceId::new(udn), name, Flavour::Dlna, location)
            .with_mime_types(["audio/mpeg"]))
    }

    fn play(&self, device: &DeviceDescriptor, url: &str, _: &Encoder) -> Result<(), DeviceControlError> {
        self.plays
            .lock()
            .unwrap()
            .push((device.id.to_string(), url.to_string()));
        if self.refuse_play.load(Ordering::SeqCst) {
            return Err(DeviceControlError::status("Play", 500, "Transition not available"));
        }
        Ok(())
    }

    fn stop(&self, device: &DeviceDescriptor) -> Result<(), DeviceControlError> {
        self.stops.lock().unwrap().push(device.id.to_string());
        Ok(())
    }

    fn get_volume(&self, _: &DeviceDescriptor) -> Result<u8, DeviceControlError> {
        Ok(self.volume.load(Ordering::SeqCst))
    }

    fn set_volume(&self, _: &DeviceDescriptor, volume: u8) -> Result<(), DeviceControlError> {
        self.volume.store(volume, Ordering::SeqCst);
        Ok(())
    }
}

/// Pipelines en mémoire : un payload fini, ou un flux qui ne se termine
/// jamais (l'extrémité d'écriture est gardée ici).
#[derive(Default)]
struct FakeFactory {
    endless: bool,
    spawned: AtomicUsize,
    writers: Mutex<Vec<DuplexStream>>,
}

impl PipelineFactory for FakeFactory {
    fn spawn(&self, _: &Sink, _: &Encoder) -> Result<Pipeline, StreamError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if self.endless {
            let (writer, reader) = tokio::io::duplex(1024);
            self.writers.lock().unwrap().push(writer);
            Ok(Pipeline::from_reader(reader))
        } else {
            Ok(Pipeline::from_reader(std::io::Cursor::new(PAYLOAD.to_vec())))
        }
    }
}

struct Harness {
    registry: RegistryHandle,
    plugin: Arc<FakePlugin>,
    factory: Arc<FakeFactory>,
    router: Router,
}

fn encoders(order: &[&str]) -> Vec<Encoder> {
    order
        .iter()
        .map(|suffix| {
            let mut encoder = select_by_suffix(suffix).unwrap();
            encoder.validate_with(|_| Ok(())).unwrap();
            encoder
        })
        .collect()
}

fn start(device_filter: &[&str], encoders: Vec<Encoder>, endless: bool) -> Harness {
    let plugin = Arc::new(FakePlugin::default());
    let factory = Arc::new(FakeFactory {
        endless,
        ..Default::default()
    });
    let plugins = PluginSet::new(
        vec![plugin.clone() as Arc<dyn RendererPlugin>],
        Duration::from_secs(2),
    );
    let options = RegistryOptions {
        device_filter: device_filter.iter().map(|s| s.to_string()).collect(),
        sink_filter: Vec::new(),
        base_url: BASE_URL.to_string(),
        encoders,
    };
    let (registry, _join) = Registry::spawn(options, plugins, factory.clone());
    let router = stream_router(registry.clone()).merge(api_router(registry.clone()));
    Harness {
        registry,
        plugin,
        factory,
        router,
    }
}

fn device(udn: &str, name: &str, mimes: &[&str]) -> DeviceDescriptor {
    DeviceDescriptor::new(
        DeviceId::new(udn),
        name,
        Flavour::Dlna,
        format!("http://192.168.1.30:49152/{}.xml", name),
    )
    .with_mime_types(mimes.iter().copied())
}

async fn get(router: &Router, path: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn renderer_state(registry: &RegistryHandle, udn: &str) -> Option<PlaybackState> {
    registry
        .list_renderers()
        .await
        .into_iter()
        .find(|d| d.id.as_str() == udn)
        .map(|d| d.state)
}

async fn single_bridge(registry: &RegistryHandle) -> BridgeSnapshot {
    let mut bridges = registry.list_bridges().await;
    assert_eq!(bridges.len(), 1, "expected one bridge, got {:?}", bridges);
    bridges.remove(0)
}

#[tokio::test]
async fn test_device_filter_keeps_only_matching_names() {
    let h = start(&["Kitchen"], encoders(&["mp3"]), false);
    h.registry.device_found(device("uuid:k", "Kitchen Speaker", &["audio/mpeg"]));
    h.registry.device_found(device("uuid:o", "Office Speaker", &["audio/mpeg"]));

    let names: Vec<String> = h
        .registry
        .list_renderers()
        .await
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["Kitchen Speaker"]);
}

#[tokio::test]
async fn test_repeated_announcements_keep_ids_unique() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    for _ in 0..3 {
        h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    }

    assert_eq!(h.registry.list_renderers().await.len(), 1);
    assert_eq!(h.registry.list_bridges().await.len(), 1);
    wait_until("play", || !h.plugin.plays().is_empty()).await;
    assert_eq!(h.plugin.plays().len(), 1);
}

#[tokio::test]
async fn test_negotiation_prefers_highest_priority_match() {
    let h = start(&[], encoders(&["opus", "mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    h.registry.device_found(device("uuid:cc-1", "Cast", &["audio/mpeg", "audio/opus"]));

    let bridges = h.registry.list_bridges().await;
    let encoder_of = |udn: &str| {
        bridges
            .iter()
            .find(|b| b.device.as_str() == udn)
            .and_then(|b| b.encoder.clone())
    };
    assert_eq!(encoder_of("uuid:tv-1").as_deref(), Some("mp3"));
    assert_eq!(encoder_of("uuid:cc-1").as_deref(), Some("opus"));
}

#[tokio::test]
async fn test_incompatible_device_is_registered_but_not_bridged() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:odd", "Odd", &["audio/x-unknown"]));

    assert_eq!(h.registry.list_renderers().await.len(), 1);
    assert!(h.registry.list_bridges().await.is_empty());
    assert!(h.plugin.plays().is_empty());
}

#[tokio::test]
async fn test_get_streams_and_returns_to_armed() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let bridge = single_bridge(&h.registry).await;
    assert_eq!(bridge.state, BridgeState::Armed);
    let url = bridge.url.unwrap();
    assert_eq!(url, format!("{}/stream/living_room/tv-1.mp3", BASE_URL));

    wait_until("play", || !h.plugin.plays().is_empty()).await;
    assert_eq!(h.plugin.plays()[0], ("uuid:tv-1".to_string(), url.clone()));

    let path = url.trim_start_matches(BASE_URL);
    let response = get(&h.router, path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Streaming);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], PAYLOAD);
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Armed);
    assert_eq!(h.factory.spawned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_stream_path_is_404() {
    let h = start(&[], encoders(&["mp3"]), false);
    let response = get(&h.router, "/stream/nothing/here.mp3").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_head_request_does_not_start_pipeline() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let response = h
        .router
        .clone()
        .oneshot(
            Request::head("/stream/living_room/tv-1.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(h.factory.spawned.load(Ordering::SeqCst), 0);
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Armed);
}

#[tokio::test]
async fn test_device_lost_while_streaming_closes_bridge() {
    let h = start(&[], encoders(&["mp3"]), true);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let path = "/stream/living_room/tv-1.mp3";
    let response = get(&h.router, path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Streaming);

    h.registry.device_lost(DeviceId::new("uuid:tv-1"));
    assert!(h.registry.list_bridges().await.is_empty());
    assert!(h.registry.list_renderers().await.is_empty());

    // Le corps en cours se termine avec la fermeture du hub
    tokio::time::timeout(Duration::from_secs(2), to_bytes(response.into_body(), usize::MAX))
        .await
        .expect("open body should end")
        .unwrap();

    assert_eq!(get(&h.router, path).await.status(), StatusCode::NOT_FOUND);
    wait_until("stop", || h.plugin.stops() == vec!["uuid:tv-1"]).await;
}

#[tokio::test]
async fn test_concurrent_readers_share_one_pipeline() {
    let h = start(&[], encoders(&["mp3"]), true);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let path = "/stream/living_room/tv-1.mp3";
    let first = get(&h.router, path).await;
    let second = get(&h.router, path).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(h.factory.spawned.load(Ordering::SeqCst), 1);

    drop(first);
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Streaming);
    drop(second);
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Armed);
}

#[tokio::test]
async fn test_sink_removal_closes_its_bridges() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.sink_added(Sink::new("kitchen", "Kitchen"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    assert_eq!(h.registry.list_bridges().await.len(), 2);

    h.registry.sink_removed("living_room".into());
    let bridge = single_bridge(&h.registry).await;
    assert_eq!(bridge.sink.as_str(), "kitchen");
    assert_eq!(
        get(&h.router, "/stream/living_room/tv-1.mp3").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_renderer_plays_one_bridge_at_a_time() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.sink_added(Sink::new("kitchen", "Kitchen"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let bridges = h.registry.list_bridges().await;
    assert_eq!(bridges.len(), 2);
    assert!(bridges.iter().all(|b| b.state == BridgeState::Armed));

    wait_until("play", || !h.plugin.plays().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.plugin.plays(),
        vec![(
            "uuid:tv-1".to_string(),
            format!("{}/stream/kitchen/tv-1.mp3", BASE_URL)
        )]
    );
}

#[tokio::test]
async fn test_closing_idle_bridge_keeps_renderer_playing() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.sink_added(Sink::new("kitchen", "Kitchen"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    wait_until("play", || !h.plugin.plays().is_empty()).await;

    // Le renderer joue "kitchen" : fermer "living_room" ne le concerne pas
    h.registry.sink_removed("living_room".into());
    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Armed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.plugin.stops().is_empty());
    assert_eq!(h.plugin.plays().len(), 1);
    assert_eq!(
        renderer_state(&h.registry, "uuid:tv-1").await,
        Some(PlaybackState::Playing)
    );
}

#[tokio::test]
async fn test_closing_played_bridge_hands_renderer_over() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.sink_added(Sink::new("kitchen", "Kitchen"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    wait_until("play", || !h.plugin.plays().is_empty()).await;

    h.registry.sink_removed("kitchen".into());
    wait_until("second play", || h.plugin.plays().len() == 2).await;
    assert_eq!(
        h.plugin.plays()[1],
        (
            "uuid:tv-1".to_string(),
            format!("{}/stream/living_room/tv-1.mp3", BASE_URL)
        )
    );
    assert!(h.plugin.stops().is_empty());

    // Plus aucun bridge vers ce renderer : il reçoit stop
    h.registry.sink_removed("living_room".into());
    assert!(h.registry.list_bridges().await.is_empty());
    wait_until("stop", || h.plugin.stops() == vec!["uuid:tv-1"]).await;
}

#[tokio::test]
async fn test_refused_play_keeps_bridge_armed() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.plugin.refuse_play.store(true, Ordering::SeqCst);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    wait_until("play", || !h.plugin.plays().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(single_bridge(&h.registry).await.state, BridgeState::Armed);
    assert_eq!(
        renderer_state(&h.registry, "uuid:tv-1").await,
        Some(PlaybackState::Unknown)
    );

    // Le renderer peut encore venir chercher le flux
    let response = get(&h.router, "/stream/living_room/tv-1.mp3").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], PAYLOAD);
    assert_ne!(
        renderer_state(&h.registry, "uuid:tv-1").await,
        Some(PlaybackState::Playing)
    );
}

#[tokio::test]
async fn test_volume_and_stop_through_api() -> anyhow::Result<()> {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));

    let response = h
        .router
        .clone()
        .oneshot(
            Request::post("/api/renderers/tv-1/volume")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"volume":30}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&h.router, "/api/renderers/uuid:tv-1/volume").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["volume"], 30);

    let response = get(&h.router, "/api/renderers/nobody/volume").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::post("/api/bridges/stop")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"sink":"living_room","device":"tv-1"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.registry.list_bridges().await.is_empty());

    let response = get(&h.router, "/api/bridges").await;
    let body: serde_json::Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body, serde_json::json!([]));

    Ok(())
}

#[tokio::test]
async fn test_renderer_added_by_url() -> anyhow::Result<()> {
    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Bedroom</friendlyName>
    <UDN>uuid:bedroom-1</UDN>
  </device>
</root>"#;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let app = Router::new().route("/desc.xml", axum::routing::get(|| async { DESCRIPTION }));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let h = start(&[], encoders(&["mp3"]), false);
    h.registry
        .add_renderer_by_url(format!("http://127.0.0.1:{}/desc.xml", port));

    let mut renderers = Vec::new();
    for _ in 0..300 {
        renderers = h.registry.list_renderers().await;
        if !renderers.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(renderers.len(), 1);
    assert_eq!(renderers[0].id.as_str(), "uuid:bedroom-1");
    assert_eq!(renderers[0].name, "Bedroom");
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_every_renderer() {
    let h = start(&[], encoders(&["mp3"]), false);
    h.registry.sink_added(Sink::new("living_room", "Living Room"));
    h.registry.device_found(device("uuid:tv-1", "TV", &["audio/mpeg"]));
    h.registry.device_found(device("uuid:tv-2", "TV 2", &["audio/mpeg"]));
    assert_eq!(h.registry.list_bridges().await.len(), 2);

    h.registry.shutdown(Duration::from_secs(2)).await;

    let mut stops = h.plugin.stops();
    stops.sort();
    assert_eq!(stops, vec!["uuid:tv-1", "uuid:tv-2"]);
    assert!(h.registry.list_bridges().await.is_empty());
}
