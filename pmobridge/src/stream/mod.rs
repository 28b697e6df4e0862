//! # Serveur de flux
//!
//! Chaque bridge armé possède un [`StreamHub`] : le premier lecteur démarre
//! le pipeline d'encodage, les suivants reçoivent les mêmes chunks via un
//! canal `broadcast`, et le départ du dernier lecteur arrête le pipeline.
//!
//! Un lecteur trop lent perd des chunks (`Lagged`) au lieu de bloquer les
//! autres. Un lecteur qui rejoint un flux déjà démarré n'en reçoit pas
//! l'en-tête de conteneur.

mod pipeline;
mod router;

pub use pipeline::{Pipeline, PipelineFactory, ProcessPipelineFactory};
pub use router::stream_router;

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::BridgeId;
use crate::encoders::Encoder;
use crate::errors::StreamError;
use crate::model::Sink;

const CHUNK_SIZE: usize = 8 * 1024;
const CHANNEL_CAPACITY: usize = 256;

/// Activité d'un hub remontée au registre
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubActivity {
    /// Premier lecteur connecté
    Started,
    /// Dernier lecteur parti, pipeline arrêté
    Stopped,
}

pub type HubNotifier = Arc<dyn Fn(HubActivity) + Send + Sync>;

struct Running {
    tx: broadcast::Sender<Bytes>,
    stop: CancellationToken,
    done: CancellationToken,
}

#[derive(Default)]
struct HubState {
    readers: usize,
    running: Option<Running>,
}

pub struct StreamHub {
    bridge: BridgeId,
    sink: Mutex<Sink>,
    encoder: Encoder,
    factory: Arc<dyn PipelineFactory>,
    notify: HubNotifier,
    state: Mutex<HubState>,
    closed: CancellationToken,
}

impl StreamHub {
    pub fn new(
        bridge: BridgeId,
        sink: Sink,
        encoder: Encoder,
        factory: Arc<dyn PipelineFactory>,
        notify: HubNotifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            sink: Mutex::new(sink),
            encoder,
            factory,
            notify,
            state: Mutex::new(HubState::default()),
            closed: CancellationToken::new(),
        })
    }

    pub fn bridge(&self) -> &BridgeId {
        &self.bridge
    }

    pub fn mime_type(&self) -> &str {
        self.encoder.mime_type()
    }

    pub fn readers(&self) -> usize {
        self.lock_state().readers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Nouveau format du sink, pris en compte au prochain démarrage du pipeline
    pub fn update_sink(&self, sink: Sink) {
        match self.sink.lock() {
            Ok(mut guard) => *guard = sink,
            Err(poisoned) => *poisoned.into_inner() = sink,
        }
    }

    /// Ajoute un lecteur, en démarrant le pipeline si nécessaire.
    pub fn attach(self: &Arc<Self>) -> Result<StreamReader, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        let mut state = self.lock_state();

        let needs_start = state
            .running
            .as_ref()
            .is_none_or(|r| r.done.is_cancelled());

        let (rx, done) = if needs_start {
            let sink = match self.sink.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            let pipeline = self.factory.spawn(&sink, &self.encoder)?;

            let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
            let stop = CancellationToken::new();
            let done = CancellationToken::new();
            tokio::spawn(pump(
                pipeline,
                tx.clone(),
                stop.clone(),
                done.clone(),
                self.bridge.clone(),
            ));
            info!("🎵 Pipeline started for {} ({})", self.bridge, self.encoder);
            state.running = Some(Running {
                tx,
                stop,
                done: done.clone(),
            });
            (rx, done)
        } else {
            let running = state
                .running
                .as_ref()
                .ok_or_else(|| StreamError::Pipeline("no running pipeline".into()))?;
            (running.tx.subscribe(), running.done.clone())
        };

        state.readers += 1;
        // Notifié sous le verrou : Started et Stopped arrivent dans l'ordre
        if state.readers == 1 {
            (self.notify)(HubActivity::Started);
        }
        drop(state);
        debug!("Reader attached to {}", self.bridge);

        Ok(StreamReader {
            hub: Arc::clone(self),
            rx,
            done,
        })
    }

    /// Ferme le hub : les corps de réponse en cours se terminent et toute
    /// connexion ultérieure est refusée.
    pub fn close(&self) {
        self.closed.cancel();
        if let Some(running) = self.lock_state().running.take() {
            running.stop.cancel();
        }
    }

    fn detach(&self) {
        let mut state = self.lock_state();
        state.readers = state.readers.saturating_sub(1);
        if state.readers > 0 {
            return;
        }
        if let Some(running) = state.running.take() {
            running.stop.cancel();
        }
        (self.notify)(HubActivity::Stopped);
        drop(state);

        debug!("Last reader left {}", self.bridge);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Copie la sortie du pipeline vers le canal broadcast.
async fn pump(
    mut pipeline: Pipeline,
    tx: broadcast::Sender<Bytes>,
    stop: CancellationToken,
    done: CancellationToken,
    bridge: BridgeId,
) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            read = pipeline.output().read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Pipeline output ended for {}", bridge);
                    break;
                }
                Ok(n) => {
                    // Aucun lecteur abonné : le chunk est perdu
                    let _ = tx.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    warn!("❌ Pipeline read error for {}: {}", bridge, e);
                    break;
                }
            },
        }
    }
    pipeline.shutdown().await;
    info!("Pipeline stopped for {}", bridge);
    done.cancel();
}

/// Lecteur attaché à un hub ; le détachement se fait au drop.
pub struct StreamReader {
    hub: Arc<StreamHub>,
    rx: broadcast::Receiver<Bytes>,
    done: CancellationToken,
}

enum Next {
    Chunk(Bytes),
    Lagged(u64),
    Drain,
    End,
}

impl StreamReader {
    /// Chunks encodés jusqu'à la fin du pipeline ou la fermeture du hub
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let mut reader = self;
        async_stream::stream! {
            let closed = reader.hub.closed.clone();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = closed.cancelled() => Next::End,
                    msg = reader.rx.recv() => match msg {
                        Ok(chunk) => Next::Chunk(chunk),
                        Err(RecvError::Lagged(n)) => Next::Lagged(n),
                        Err(RecvError::Closed) => Next::End,
                    },
                    _ = reader.done.cancelled() => Next::Drain,
                };

                match next {
                    Next::Chunk(chunk) => yield Ok(chunk),
                    Next::Lagged(n) => debug!("Slow reader on {} skipped {} chunks", reader.hub.bridge, n),
                    Next::Drain => {
                        loop {
                            match reader.rx.try_recv() {
                                Ok(chunk) => yield Ok(chunk),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                    Next::End => break,
                }
            }
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.hub.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::select_by_suffix;
    use crate::model::{DeviceId, SinkId};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        spawned: AtomicUsize,
        payload: Vec<u8>,
    }

    impl PipelineFactory for CountingFactory {
        fn spawn(&self, _: &Sink, _: &Encoder) -> Result<Pipeline, StreamError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(Pipeline::from_reader(std::io::Cursor::new(self.payload.clone())))
        }
    }

    /// Pipeline qui ne produit rien tant qu'on ne l'arrête pas
    #[derive(Default)]
    struct SilentFactory {
        spawned: AtomicUsize,
    }

    impl PipelineFactory for SilentFactory {
        fn spawn(&self, _: &Sink, _: &Encoder) -> Result<Pipeline, StreamError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let (writer, reader) = tokio::io::duplex(64);
            tokio::spawn(async move {
                let _writer = writer;
                std::future::pending::<()>().await;
            });
            Ok(Pipeline::from_reader(reader))
        }
    }

    fn hub(factory: Arc<dyn PipelineFactory>) -> (Arc<StreamHub>, Arc<Mutex<Vec<HubActivity>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let hub = StreamHub::new(
            BridgeId::new(SinkId::new("living"), DeviceId::new("uuid:tv")),
            Sink::new("living", "Living Room"),
            select_by_suffix("mp3").unwrap(),
            factory,
            Arc::new(move |a| sink_events.lock().unwrap().push(a)),
        );
        (hub, events)
    }

    #[tokio::test]
    async fn test_single_reader_gets_whole_payload() {
        let factory = Arc::new(CountingFactory {
            spawned: AtomicUsize::new(0),
            payload: b"ID3-audio-bytes".to_vec(),
        });
        let (hub, events) = hub(factory.clone());

        let reader = hub.attach().unwrap();
        let chunks: Vec<_> = reader.into_stream().collect().await;
        let body: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();

        assert_eq!(body, b"ID3-audio-bytes");
        assert_eq!(hub.readers(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![HubActivity::Started, HubActivity::Stopped]
        );
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_pipeline() {
        let factory = Arc::new(SilentFactory::default());
        let (hub, events) = hub(factory.clone());

        let readers: Vec<_> = (0..4).map(|_| hub.attach().unwrap()).collect();
        assert_eq!(hub.readers(), 4);
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 1);

        drop(readers);
        assert_eq!(hub.readers(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![HubActivity::Started, HubActivity::Stopped]
        );

        let _again = hub.attach().unwrap();
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_activity_order_follows_reader_count() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        let hub = StreamHub::new(
            BridgeId::new(SinkId::new("living"), DeviceId::new("uuid:tv")),
            Sink::new("living", "Living Room"),
            select_by_suffix("mp3").unwrap(),
            Arc::new(SilentFactory::default()),
            Arc::new(move |a| {
                // Le notifieur du dernier lecteur est lent
                if a == HubActivity::Stopped {
                    std::thread::sleep(std::time::Duration::from_millis(150));
                }
                recorded.lock().unwrap().push(a);
            }),
        );

        let first = hub.attach().unwrap();
        let leaving = std::thread::spawn(move || drop(first));
        std::thread::sleep(std::time::Duration::from_millis(30));

        let runtime = tokio::runtime::Handle::current();
        let joining = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                let _guard = runtime.enter();
                hub.attach().unwrap()
            })
        };
        leaving.join().unwrap();
        let second = joining.join().unwrap();

        assert_eq!(hub.readers(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                HubActivity::Started,
                HubActivity::Stopped,
                HubActivity::Started
            ]
        );
        drop(second);
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_refuses_readers() {
        let (hub, _) = hub(Arc::new(SilentFactory::default()));
        let reader = hub.attach().unwrap();
        let collector = tokio::spawn(reader.into_stream().count());

        hub.close();
        let count = tokio::time::timeout(std::time::Duration::from_secs(2), collector)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(hub.attach(), Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn test_restart_after_pipeline_end() {
        let factory = Arc::new(CountingFactory {
            spawned: AtomicUsize::new(0),
            payload: b"x".to_vec(),
        });
        let (hub, _) = hub(factory.clone());

        let first: Vec<_> = hub.attach().unwrap().into_stream().collect().await;
        assert_eq!(first.len(), 1);
        let second: Vec<_> = hub.attach().unwrap().into_stream().collect().await;
        assert_eq!(second.len(), 1);
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 2);
    }
}
