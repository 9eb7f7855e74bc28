use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use futures_util::StreamExt;
use jamroom_core::{
    BlobMetadata, BlobStore, DownloadError, DownloadStatus, MediaResolver, MediaStream, QueueItem,
    RoomCode, RoomResult,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    time::Instant,
};

use crate::{CollabContext, DownloadUpdate, RoomRegistry};

pub type DownloadSignalSender = UnboundedSender<DownloadSignal>;
pub type DownloadSignalReceiver = UnboundedReceiver<DownloadSignal>;

/// Tells the orchestrator that a room needs to be looked at again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSignal {
    QueueChanged(RoomCode),
    /// The current track changed to the given index.
    TrackChanged(RoomCode, Option<usize>),
    RoomDeleted(RoomCode),
}

/// The downloads running for one room.
#[derive(Debug)]
struct RoomDownloads {
    /// External ids of the items that hold a slot.
    in_flight: HashSet<String>,
    limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStats {
    pub in_flight: usize,
    pub limit: usize,
    pub external_ids: Vec<String>,
}

/// Moves queued items through resolve, fetch and upload, with a per-room concurrency cap.
///
/// Each room's slot set is shared with the tasks running for it. Deleting a room only detaches
/// the set from the map, so tasks finishing later can not touch a new room with the same code.
pub struct DownloadOrchestrator<R, S> {
    context: CollabContext,
    registry: Arc<RoomRegistry>,
    resolver: Arc<R>,
    store: Arc<S>,

    rooms: DashMap<RoomCode, Arc<Mutex<RoomDownloads>>>,
    me: Weak<Self>,
}

impl<R, S> DownloadOrchestrator<R, S>
where
    R: MediaResolver,
    S: BlobStore,
{
    pub fn new(
        context: &CollabContext,
        registry: Arc<RoomRegistry>,
        resolver: Arc<R>,
        store: Arc<S>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            context: context.clone(),
            registry,
            resolver,
            store,
            rooms: Default::default(),
            me: me.clone(),
        })
    }

    /// Handles signals until every sender is gone.
    pub async fn run(self: Arc<Self>, mut signals: DownloadSignalReceiver) {
        while let Some(signal) = signals.recv().await {
            match signal {
                DownloadSignal::QueueChanged(code) => self.on_queue_changed(&code),
                DownloadSignal::TrackChanged(code, index) => self.on_track_changed(&code, index),
                DownloadSignal::RoomDeleted(code) => self.cleanup_room(&code),
            }
        }

        debug!("Download signal channel closed");
    }

    /// Starts downloads for pending items while the room has free slots.
    /// Must be called within a tokio runtime.
    pub fn on_queue_changed(&self, code: &RoomCode) {
        self.schedule(code);
    }

    /// Items download in queue order regardless of the current track, so this only re-evaluates.
    pub fn on_track_changed(&self, code: &RoomCode, index: Option<usize>) {
        debug!("Current track of room {} is now {:?}", code, index);
        self.schedule(code);
    }

    /// Forgets the slots of a deleted room. Running downloads finish, but their results are dropped.
    pub fn cleanup_room(&self, code: &RoomCode) {
        if let Some((_, downloads)) = self.rooms.remove(code) {
            let in_flight = downloads.lock().in_flight.len();
            debug!("Cleaned up downloads of room {}, {} still running", code, in_flight);
        }
    }

    /// Puts failed items of a room back into the pipeline.
    pub fn refresh(&self, code: &RoomCode) -> RoomResult<usize> {
        let count = self.registry.reset_failed(code)?;
        self.schedule(code);

        Ok(count)
    }

    pub fn stats(&self, code: &RoomCode) -> Option<DownloadStats> {
        let downloads = self.rooms.get(code)?.value().clone();
        let downloads = downloads.lock();

        Some(DownloadStats {
            in_flight: downloads.in_flight.len(),
            limit: downloads.limit,
            external_ids: downloads.in_flight.iter().cloned().collect(),
        })
    }

    /// Completes an item right away if its media is already stored.
    /// Lookup failures are treated as "not stored".
    pub async fn check_preexisting(&self, code: &RoomCode, item: &QueueItem) -> bool {
        let key = self.context.config.blob_key(&item.external_id);

        match self.store.exists(&key).await {
            Ok(true) => {
                info!("\"{}\" is already stored, skipping download", item.title);

                self.report(
                    code,
                    DownloadUpdate::PreDownloaded {
                        item_id: item.id,
                        media_url: self.store.public_url_for(&key),
                    },
                );

                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!("Could not check storage for {}: {}", key, err);
                false
            }
        }
    }

    /// Fetches the media of an item and uploads it, reporting progress along the way.
    pub async fn start_download(
        &self,
        code: &RoomCode,
        item: &QueueItem,
    ) -> Result<(), DownloadError> {
        let key = self.context.config.blob_key(&item.external_id);
        let interval = self.context.config.progress_interval;

        info!("Downloading \"{}\" for room {}", item.title, code);
        self.report_progress(code, item, DownloadStatus::Downloading, 0);

        let MediaStream {
            total_length,
            mut bytes,
        } = self.resolver.fetch_stream(&item.source_url).await?;

        let mut buffer = Vec::new();
        let mut last_report = Instant::now();

        while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(&chunk?);

            if last_report.elapsed() >= interval {
                last_report = Instant::now();

                let progress = percentage(buffer.len(), total_length);
                self.report_progress(code, item, DownloadStatus::Downloading, progress);
            }
        }

        if buffer.is_empty() {
            return Err(DownloadError::EmptyStream);
        }

        debug!("Uploading {} bytes as {}", buffer.len(), key);
        self.report_progress(code, item, DownloadStatus::Uploading, 100);

        let metadata = BlobMetadata {
            content_type: "audio/mpeg".to_string(),
            title: item.title.clone(),
            artist: item.artist.clone(),
            external_id: item.external_id.clone(),
        };

        let media_url = self.store.upload(&key, buffer, metadata).await?;

        info!("Finished \"{}\" for room {}", item.title, code);
        self.report(
            code,
            DownloadUpdate::Completed {
                item_id: item.id,
                media_url,
            },
        );

        Ok(())
    }

    fn schedule(&self, code: &RoomCode) {
        let Some(downloads) = self.downloads_of(code) else {
            return;
        };

        let jobs = {
            let mut state = downloads.lock();

            let Ok(pending) = self.registry.pending_items(code) else {
                return;
            };

            let mut jobs = Vec::new();

            for item in pending {
                if state.in_flight.len() >= state.limit {
                    break;
                }

                if state.in_flight.insert(item.external_id.clone()) {
                    jobs.push(item);
                }
            }

            jobs
        };

        let Some(me) = self.me.upgrade() else {
            return;
        };

        for item in jobs {
            debug!("Scheduling \"{}\" in room {}", item.title, code);
            tokio::spawn(me.clone().run_job(downloads.clone(), code.clone(), item));
        }
    }

    async fn run_job(
        self: Arc<Self>,
        downloads: Arc<Mutex<RoomDownloads>>,
        code: RoomCode,
        item: QueueItem,
    ) {
        let result = if self.check_preexisting(&code, &item).await {
            Ok(())
        } else {
            self.start_download(&code, &item).await
        };

        if let Err(err) = result {
            warn!("Download of \"{}\" in room {} failed: {}", item.title, code, err);

            self.report(
                &code,
                DownloadUpdate::Failed {
                    item_id: item.id,
                    error: err.to_string(),
                },
            );
        }

        downloads.lock().in_flight.remove(&item.external_id);
        self.schedule(&code);
    }

    fn downloads_of(&self, code: &RoomCode) -> Option<Arc<Mutex<RoomDownloads>>> {
        if let Some(downloads) = self.rooms.get(code) {
            return Some(downloads.value().clone());
        }

        if !self.registry.contains(code) {
            return None;
        }

        let limit = self.context.config.download_concurrency.max(1);

        let downloads = self
            .rooms
            .entry(code.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RoomDownloads {
                    in_flight: HashSet::new(),
                    limit,
                }))
            })
            .value()
            .clone();

        Some(downloads)
    }

    fn report_progress(
        &self,
        code: &RoomCode,
        item: &QueueItem,
        status: DownloadStatus,
        progress: u8,
    ) {
        self.report(
            code,
            DownloadUpdate::Progress {
                item_id: item.id,
                status,
                progress,
            },
        );
    }

    /// Results for rooms or items that are gone are dropped.
    fn report(&self, code: &RoomCode, update: DownloadUpdate) {
        if let Err(err) = self.registry.apply_download_update(code, update) {
            debug!("Dropped download update for room {}: {}", code, err);
        }
    }
}

fn percentage(received: usize, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => ((received as u64 * 100) / total).min(100) as u8,
        _ => 0,
    }
}
