mod rooms;

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use jamroom_core::{
    BlobMetadata, BlobStore, Broadcaster, Config, MediaResolver, MediaStream, ResolveError,
    RoomCode, StorageError, TrackInfo,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::Semaphore, time::sleep};

use crate::{Collab, CollabEvent, EventReceiver, Member, Recipients};

#[derive(Default)]
struct ResolverState {
    unavailable: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    chunks: AtomicUsize,
    chunk_delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fetches: AtomicUsize,
}

/// Resolves `https://media.test/<id>` urls to a track with external id `<id>`.
#[derive(Clone, Default)]
pub struct FakeResolver {
    state: Arc<ResolverState>,
}

impl FakeResolver {
    /// Fetches of this url fail.
    pub fn make_unavailable(&self, url: &str) {
        self.state.unavailable.lock().insert(url.to_string());
    }

    pub fn make_available(&self, url: &str) {
        self.state.unavailable.lock().remove(url);
    }

    /// Fetches wait for a permit of the returned semaphore before streaming.
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.state.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn set_stream(&self, chunks: usize, delay: Duration) {
        self.state.chunks.store(chunks, Ordering::SeqCst);
        *self.state.chunk_delay.lock() = delay;
    }

    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> Result<TrackInfo, ResolveError> {
        let id = url
            .strip_prefix("https://media.test/")
            .ok_or_else(|| ResolveError::Unsupported(url.to_string()))?;

        Ok(TrackInfo {
            title: format!("Track {}", id),
            artist: "Artist".to_string(),
            duration_seconds: 120.,
            thumbnail_url: String::new(),
            external_id: id.to_string(),
        })
    }

    async fn fetch_stream(&self, url: &str) -> Result<MediaStream, ResolveError> {
        let state = &self.state;

        state.fetches.fetch_add(1, Ordering::SeqCst);
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_active.fetch_max(active, Ordering::SeqCst);

        let gate = state.gate.lock().clone();

        if let Some(gate) = gate {
            gate.acquire().await.expect("gate is open").forget();
        }

        state.active.fetch_sub(1, Ordering::SeqCst);

        if state.unavailable.lock().contains(url) {
            return Err(ResolveError::Unavailable);
        }

        let chunks = state.chunks.load(Ordering::SeqCst).max(1);
        let delay = *state.chunk_delay.lock();

        let bytes = stream::iter(0..chunks)
            .then(move |_| async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }

                Ok(vec![7u8; 100])
            })
            .boxed();

        Ok(MediaStream {
            total_length: Some(chunks as u64 * 100),
            bytes,
        })
    }
}

#[derive(Default)]
struct StoreState {
    blobs: DashMap<String, BlobMetadata>,
    failing: AtomicBool,
    uploads: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<StoreState>,
}

impl FakeStore {
    pub fn insert(&self, key: &str) {
        let metadata = BlobMetadata {
            content_type: "audio/mpeg".to_string(),
            title: String::new(),
            artist: String::new(),
            external_id: String::new(),
        };

        self.state.blobs.insert(key.to_string(), metadata);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.blobs.contains_key(key)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> usize {
        self.state.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.state.blobs.contains_key(key))
    }

    fn public_url_for(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }

    async fn upload(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<String, StorageError> {
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded);
        }

        self.state.uploads.fetch_add(1, Ordering::SeqCst);
        self.state.blobs.insert(key.to_string(), metadata);

        Ok(self.public_url_for(key))
    }
}

/// Records the events each connected room received, until the room is disconnected.
#[derive(Default)]
pub struct FakeClients {
    received: DashMap<RoomCode, Vec<String>>,
    disconnected: Mutex<HashSet<RoomCode>>,
}

impl FakeClients {
    pub fn connect(&self, code: &RoomCode) {
        self.received.insert(code.clone(), Vec::new());
    }

    pub fn disconnect_room(&self, code: &RoomCode) {
        self.disconnected.lock().insert(code.clone());
    }

    pub fn last_received(&self, code: &RoomCode) -> Option<String> {
        self.received.get(code)?.last().cloned()
    }
}

impl Broadcaster for FakeClients {
    fn send_to_room(&self, code: &RoomCode, event: &str, _payload: &Value) {
        if self.disconnected.lock().contains(code) {
            return;
        }

        if let Some(mut received) = self.received.get_mut(code) {
            received.push(event.to_string());
        }
    }

    fn send_to_connection(&self, _connection_id: &str, _event: &str, _payload: &Value) {}
}

pub struct Harness {
    pub collab: Collab<FakeResolver, FakeStore>,
    pub resolver: FakeResolver,
    pub store: FakeStore,
    events: EventReceiver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let resolver = FakeResolver::default();
        let store = FakeStore::default();
        let collab = Collab::new(config, resolver.clone(), store.clone());
        let events = collab.events();

        Self {
            collab,
            resolver,
            store,
            events,
        }
    }

    /// Creates a room and joins the given members after the host.
    pub fn room_with(&self, host: &str, others: &[&str]) -> (RoomCode, Vec<Member>) {
        let (room, host) = self.collab.create_room(host);
        let mut members = vec![host];

        for name in others {
            let (_, member) = self.collab.join_room(&room.code, name).unwrap();
            members.push(member);
        }

        (room.code, members)
    }

    /// Takes every event emitted so far.
    pub fn drain(&self) -> Vec<(Recipients, CollabEvent)> {
        self.events
            .try_iter()
            .map(|e| (e.recipients, e.event))
            .collect()
    }

    /// Takes the wire names of every event emitted so far.
    pub fn drain_names(&self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|(_, event)| event.to_message().unwrap().0)
            .collect()
    }
}

pub fn url(id: &str) -> String {
    format!("https://media.test/{}", id)
}

/// Lets spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}
