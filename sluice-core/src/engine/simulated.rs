//! In-memory simulated swarm
//!
//! Reveals pack metadata after a configurable delay, then "downloads"
//! fixed-size pieces at a configured rate. Prioritized windows are fetched
//! first and everything else follows in order. Reads of bytes whose pieces
//! are not complete yet suspend until the driver completes them, the same
//! way a progressive engine behaves.
//!
//! Content is either seeded explicitly via [`SimulatedEngine::seed_pack`] or
//! synthesized deterministically from the identifier, see [`synthetic_byte`].

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    ByteStream, ContentEngine, EngineError, EngineHints, FileMeta, PackHandle, PackMetadata,
    PackStatus, locate_window, spawn_guarded,
};
use crate::config::SimulationConfig;
use crate::content::{ContentDescriptor, ContentId};

/// Largest chunk a read yields at once.
const READ_CHUNK_SIZE: u64 = 64 * 1024;
const NFO_SIZE: u64 = 2 * 1024;
const SUBTITLE_SIZE: u64 = 48 * 1024;
const MIN_TICK: Duration = Duration::from_millis(1);

/// Byte at `offset` of the concatenated synthetic pack for `id`.
pub fn synthetic_byte(id: &ContentId, offset: u64) -> u8 {
    id.as_bytes()[(offset % 20) as usize] ^ (offset % 251) as u8
}

/// Explicit pack content for the simulated swarm.
#[derive(Debug, Clone)]
pub struct SyntheticPack {
    pub name: String,
    /// (path relative to the pack root, content)
    pub files: Vec<(String, Bytes)>,
}

enum FileContent {
    Seeded(Bytes),
    Synthetic,
}

struct PackLayout {
    metadata: Arc<PackMetadata>,
    contents: Vec<FileContent>,
    offsets: Vec<u64>,
    total: u64,
}

impl PackLayout {
    fn seeded(pack: &SyntheticPack) -> Self {
        let files = pack
            .files
            .iter()
            .map(|(path, data)| FileMeta {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: format!("{}/{}", pack.name, path),
                length: data.len() as u64,
            })
            .collect();
        let contents = pack
            .files
            .iter()
            .map(|(_, data)| FileContent::Seeded(data.clone()))
            .collect();
        Self::new(pack.name.clone(), files, contents)
    }

    fn synthetic(name: &str, main_size: u64) -> Self {
        let files = [
            (format!("{name}.nfo"), NFO_SIZE),
            (format!("{name}.mkv"), main_size),
            (format!("{name}.en.srt"), SUBTITLE_SIZE),
        ]
        .into_iter()
        .map(|(file, length)| FileMeta {
            path: format!("{name}/{file}"),
            name: file,
            length,
        })
        .collect::<Vec<_>>();
        let contents = files.iter().map(|_| FileContent::Synthetic).collect();
        Self::new(name.to_string(), files, contents)
    }

    fn new(name: String, files: Vec<FileMeta>, contents: Vec<FileContent>) -> Self {
        let mut offsets = Vec::with_capacity(files.len());
        let mut total = 0;
        for file in &files {
            offsets.push(total);
            total += file.length;
        }
        Self {
            metadata: Arc::new(PackMetadata { name, files }),
            contents,
            offsets,
            total,
        }
    }

    /// `len` bytes of file `file_index` starting at file offset `start`.
    fn bytes(&self, id: &ContentId, file_index: usize, start: u64, len: u64) -> Bytes {
        match &self.contents[file_index] {
            FileContent::Seeded(data) => data.slice(start as usize..(start + len) as usize),
            FileContent::Synthetic => {
                let base = self.offsets[file_index] + start;
                (base..base + len)
                    .map(|offset| synthetic_byte(id, offset))
                    .collect::<Vec<u8>>()
                    .into()
            }
        }
    }
}

struct PieceState {
    have: Vec<bool>,
    completed: usize,
    /// Pack offset the next downloads start from
    cursor: u64,
    /// Download budget carried between ticks, in bytes
    carry: u64,
}

impl PieceState {
    /// First missing piece at or after `from`, wrapping to the start.
    fn next_missing(&self, from: usize) -> Option<usize> {
        let from = from.min(self.have.len());
        self.have[from..]
            .iter()
            .position(|have| !have)
            .map(|pos| pos + from)
            .or_else(|| self.have.iter().position(|have| !have))
    }
}

/// Engine-side state of one simulated pack, shared by the driver task,
/// handles and open reads.
struct SimPack {
    id: ContentId,
    status_tx: watch::Sender<PackStatus>,
    layout: OnceLock<Arc<PackLayout>>,
    pieces: Mutex<PieceState>,
    piece_size: u64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SimPack {
    fn new(id: ContentId, piece_size: u64) -> Self {
        let (status_tx, _) = watch::channel(PackStatus::default());
        Self {
            id,
            status_tx,
            layout: OnceLock::new(),
            pieces: Mutex::new(PieceState {
                have: Vec::new(),
                completed: 0,
                cursor: 0,
                carry: 0,
            }),
            piece_size: piece_size.max(1),
            driver: Mutex::new(None),
        }
    }

    fn reveal(&self, layout: PackLayout) {
        let piece_count = layout.total.div_ceil(self.piece_size) as usize;
        let metadata = Arc::clone(&layout.metadata);
        self.pieces.lock().have = vec![false; piece_count];
        let _ = self.layout.set(Arc::new(layout));

        info!(
            "Simulated metadata for {}: {} ({} files, {} pieces)",
            self.id,
            metadata.name,
            metadata.files.len(),
            piece_count
        );

        self.status_tx.send_modify(|status| {
            status.metadata = Some(metadata);
            if piece_count == 0 {
                status.progress = 1.0;
            }
        });
    }

    fn fail(&self, reason: String) {
        self.status_tx.send_modify(|status| {
            status.error = Some(reason);
            status.download_speed = 0;
            status.upload_speed = 0;
        });
    }

    /// Completes up to one tick's worth of pieces. Returns true once the
    /// whole pack is present.
    fn download_tick(&self, budget: u64, peers: usize) -> bool {
        let Some(layout) = self.layout.get() else {
            return false;
        };

        let (progress, downloaded, complete) = {
            let mut pieces = self.pieces.lock();
            let total_pieces = pieces.have.len();
            pieces.carry += budget;
            let mut allowance = pieces.carry / self.piece_size;
            pieces.carry %= self.piece_size;

            while allowance > 0 {
                let from = (pieces.cursor / self.piece_size) as usize;
                let Some(next) = pieces.next_missing(from) else {
                    break;
                };
                pieces.have[next] = true;
                pieces.completed += 1;
                pieces.cursor = (next as u64 + 1) * self.piece_size;
                allowance -= 1;
            }

            let complete = pieces.completed == total_pieces;
            let downloaded = if complete {
                layout.total
            } else {
                (pieces.completed as u64 * self.piece_size).min(layout.total)
            };
            let progress = if total_pieces == 0 {
                1.0
            } else {
                pieces.completed as f64 / total_pieces as f64
            };
            (progress, downloaded, complete)
        };

        let rate = if complete { 0 } else { budget };
        self.status_tx.send_modify(|status| {
            status.progress = progress;
            status.downloaded = downloaded;
            status.download_speed = rate;
            status.upload_speed = rate / 4;
            status.uploaded += budget / 4;
            status.peers = if complete { 0 } else { peers };
        });
        complete
    }

    /// Bytes present contiguously from pack offset `start`, capped at `wanted`.
    fn contiguous_available(&self, start: u64, wanted: u64) -> u64 {
        let pieces = self.pieces.lock();
        let mut available = 0;
        let mut offset = start;
        while available < wanted {
            let piece = (offset / self.piece_size) as usize;
            if !pieces.have.get(piece).copied().unwrap_or(false) {
                break;
            }
            let piece_end = (piece as u64 + 1) * self.piece_size;
            let step = (piece_end - offset).min(wanted - available);
            available += step;
            offset += step;
        }
        available
    }

    fn stop(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        self.fail("pack removed".to_string());
    }
}

async fn drive(
    pack: Arc<SimPack>,
    layout: PackLayout,
    failure: Option<String>,
    config: SimulationConfig,
) {
    tokio::time::sleep(config.metadata_delay).await;
    if let Some(reason) = failure {
        info!("Simulated failure for {}: {}", pack.id, reason);
        pack.fail(reason);
        return;
    }
    pack.reveal(layout);

    let id_seed = u64::from_le_bytes(
        pack.id.as_bytes()[..8]
            .try_into()
            .unwrap_or_default(),
    );
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ id_seed);
    let tick = config.tick_interval.max(MIN_TICK);
    let budget = (config.download_rate_bps as u128 * tick.as_millis() / 1000) as u64;

    let mut interval = tokio::time::interval(tick);
    interval.tick().await;
    loop {
        interval.tick().await;
        let peers = if config.peer_count == 0 {
            0
        } else {
            rng.random_range(config.peer_count.div_ceil(2)..=config.peer_count)
        };
        if pack.download_tick(budget, peers) {
            debug!("Simulated download of {} complete", pack.id);
            break;
        }
    }
}

/// Lazy read over a window of one file.
struct ReadCursor {
    pack: Arc<SimPack>,
    layout: Arc<PackLayout>,
    status_rx: watch::Receiver<PackStatus>,
    file_index: usize,
    file_offset: u64,
    next: u64,
    end: u64,
}

impl ReadCursor {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, EngineError> {
        if self.next > self.end {
            return Ok(None);
        }

        loop {
            if let Some(reason) = self.status_rx.borrow_and_update().error.clone() {
                return Err(EngineError::ReadFailed { reason });
            }

            let wanted = (self.end - self.next + 1).min(READ_CHUNK_SIZE);
            let available = self
                .pack
                .contiguous_available(self.file_offset + self.next, wanted);
            if available > 0 {
                let bytes =
                    self.layout
                        .bytes(&self.pack.id, self.file_index, self.next, available);
                self.next += available;
                return Ok(Some(bytes));
            }

            // Piece completion is recorded before the status update is sent,
            // so a change notification always follows newly readable bytes.
            if self.status_rx.changed().await.is_err() {
                return Err(EngineError::Shutdown);
            }
        }
    }
}

/// Handle given out by [`SimulatedEngine`].
struct SimPackHandle {
    pack: Arc<SimPack>,
}

impl PackHandle for SimPackHandle {
    fn id(&self) -> ContentId {
        self.pack.id
    }

    fn status(&self) -> watch::Receiver<PackStatus> {
        self.pack.status_tx.subscribe()
    }

    fn prioritize(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<(), EngineError> {
        let layout = self.pack.layout.get();
        let (offset, _) = locate_window(
            self.pack.id,
            layout.map(|layout| layout.metadata.as_ref()),
            file_index,
            &window,
        )?;
        self.pack.pieces.lock().cursor = offset + window.start();
        debug!(
            "Prioritized {} file {} from byte {}",
            self.pack.id,
            file_index,
            window.start()
        );
        Ok(())
    }

    fn read(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<ByteStream, EngineError> {
        let layout = self.pack.layout.get().cloned();
        let (offset, _) = locate_window(
            self.pack.id,
            layout.as_deref().map(|layout| layout.metadata.as_ref()),
            file_index,
            &window,
        )?;
        let layout = layout.ok_or(EngineError::MetadataUnavailable { id: self.pack.id })?;

        let cursor = ReadCursor {
            status_rx: self.pack.status_tx.subscribe(),
            pack: Arc::clone(&self.pack),
            layout,
            file_index,
            file_offset: offset,
            next: *window.start(),
            end: *window.end(),
        };
        Ok(Box::pin(stream::unfold(Some(cursor), |state| async move {
            let mut cursor = state?;
            match cursor.next_chunk().await {
                Ok(Some(bytes)) => Some((Ok(bytes), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })))
    }
}

/// Content engine backed by an in-memory simulated swarm.
pub struct SimulatedEngine {
    config: SimulationConfig,
    packs: RwLock<HashMap<ContentId, Arc<SimPack>>>,
    seeded: RwLock<HashMap<ContentId, SyntheticPack>>,
    failures: RwLock<HashMap<ContentId, String>>,
}

impl SimulatedEngine {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            packs: RwLock::new(HashMap::new()),
            seeded: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Serves `pack` for `id` instead of the synthetic layout.
    pub fn seed_pack(&self, id: ContentId, pack: SyntheticPack) {
        self.seeded.write().insert(id, pack);
    }

    /// Makes every future add of `id` fail after the metadata delay.
    pub fn inject_failure(&self, id: ContentId, reason: impl Into<String>) {
        self.failures.write().insert(id, reason.into());
    }

    pub fn clear_failure(&self, id: &ContentId) {
        self.failures.write().remove(id);
    }

    /// Number of packs currently tracked.
    pub fn pack_count(&self) -> usize {
        self.packs.read().len()
    }

    fn layout_for(&self, descriptor: &ContentDescriptor) -> PackLayout {
        if let Some(pack) = self.seeded.read().get(&descriptor.id) {
            return PackLayout::seeded(pack);
        }
        let name = descriptor
            .display_name
            .clone()
            .unwrap_or_else(|| format!("pack-{}", descriptor.id.short()));
        PackLayout::synthetic(&name, self.config.synthetic_file_size)
    }
}

#[async_trait]
impl ContentEngine for SimulatedEngine {
    async fn add(
        &self,
        descriptor: &ContentDescriptor,
        hints: &EngineHints,
    ) -> Result<Arc<dyn PackHandle>, EngineError> {
        hints.validate()?;
        let id = descriptor.id;

        let pack = {
            let mut packs = self.packs.write();
            if packs.contains_key(&id) {
                return Err(EngineError::Duplicate { id });
            }
            let pack = Arc::new(SimPack::new(id, self.config.piece_size));
            packs.insert(id, Arc::clone(&pack));
            pack
        };

        let layout = self.layout_for(descriptor);
        let failure = self.failures.read().get(&id).cloned();
        let panicked = Arc::clone(&pack);
        let driver = spawn_guarded(
            "simulated-pack",
            drive(Arc::clone(&pack), layout, failure, self.config.clone()),
            move |message| panicked.fail(format!("engine task panicked: {message}")),
        );
        *pack.driver.lock() = Some(driver);

        info!(
            "Simulated engine accepted {} with {} announce endpoints",
            id,
            hints.announce.len()
        );
        Ok(Arc::new(SimPackHandle { pack }))
    }

    fn get(&self, id: &ContentId) -> Option<Arc<dyn PackHandle>> {
        self.packs.read().get(id).map(|pack| {
            Arc::new(SimPackHandle {
                pack: Arc::clone(pack),
            }) as Arc<dyn PackHandle>
        })
    }

    async fn remove(&self, id: &ContentId) -> Result<(), EngineError> {
        let pack = self
            .packs
            .write()
            .remove(id)
            .ok_or(EngineError::NotFound { id: *id })?;
        pack.stop();
        info!("Simulated engine removed {}", id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
