//! Scripted content engine for tests.
//!
//! `ScriptedEngine` answers adds according to an [`AddBehavior`] and counts
//! every invocation, so callers can assert single-flight and retry behavior
//! without timing races. File contents follow [`pattern_byte`].

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    ByteStream, ContentEngine, EngineError, EngineHints, FileMeta, PackHandle, PackMetadata,
    PackStatus, locate_window,
};
use crate::content::{ContentDescriptor, ContentId};

/// Byte at `offset` of every scripted file.
pub fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// How the engine answers the next adds.
#[derive(Debug, Clone)]
pub enum AddBehavior {
    /// Accept and publish metadata after the metadata delay.
    Accept,
    /// Reject the add outright.
    Reject(EngineError),
    /// Accept, then publish `reason` as a pack error instead of metadata.
    FailAfterAdd(String),
    /// Register the pack but answer `Duplicate`, as an engine does when the
    /// same descriptor was added through another path.
    Duplicate,
    /// Answer `Duplicate` without having a pack to hand out.
    DuplicateWithoutHandle,
    /// Answer `Duplicate` for a pack that already failed with `reason`.
    DuplicateOfFailed(String),
    /// Accept but never publish metadata.
    Stall,
}

/// Pack created by [`ScriptedEngine`]; tests drive it by hand.
pub struct ScriptedPack {
    id: ContentId,
    metadata: Arc<PackMetadata>,
    status_tx: watch::Sender<PackStatus>,
    prioritized: Mutex<Vec<(usize, RangeInclusive<u64>)>>,
    fail_reads: AtomicBool,
}

impl ScriptedPack {
    fn new(id: ContentId, files: &[(String, u64)]) -> Self {
        let metadata = PackMetadata {
            name: format!("scripted-{}", id.short()),
            files: files
                .iter()
                .map(|(name, length)| FileMeta {
                    name: name.clone(),
                    path: name.clone(),
                    length: *length,
                })
                .collect(),
        };
        let (status_tx, _) = watch::channel(PackStatus::default());
        Self {
            id,
            metadata: Arc::new(metadata),
            status_tx,
            prioritized: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn publish_metadata(&self) {
        let metadata = Arc::clone(&self.metadata);
        self.status_tx
            .send_modify(|status| status.metadata = Some(metadata));
    }

    pub fn set_progress(&self, progress: f64) {
        let total = self.metadata.total_length();
        self.status_tx.send_modify(|status| {
            status.progress = progress;
            status.downloaded = (total as f64 * progress.clamp(0.0, 1.0)) as u64;
            status.download_speed = 1_000;
            status.peers = 3;
        });
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status_tx
            .send_modify(|status| status.error = Some(reason));
    }

    /// Makes reads yield one chunk and then an error.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn restore_reads(&self) {
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    /// Windows passed to `prioritize` so far.
    pub fn prioritized(&self) -> Vec<(usize, RangeInclusive<u64>)> {
        self.prioritized.lock().clone()
    }
}

impl PackHandle for ScriptedPack {
    fn id(&self) -> ContentId {
        self.id
    }

    fn status(&self) -> watch::Receiver<PackStatus> {
        self.status_tx.subscribe()
    }

    fn prioritize(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<(), EngineError> {
        let status = self.status_tx.borrow().metadata.clone();
        locate_window(self.id, status.as_deref(), file_index, &window)?;
        self.prioritized.lock().push((file_index, window));
        Ok(())
    }

    fn read(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<ByteStream, EngineError> {
        let status = self.status_tx.borrow().metadata.clone();
        locate_window(self.id, status.as_deref(), file_index, &window)?;

        let data: Bytes = window.clone().map(pattern_byte).collect::<Vec<u8>>().into();
        let chunks = if self.fail_reads.load(Ordering::SeqCst) {
            let half = data.slice(..data.len() / 2);
            vec![
                Ok(half),
                Err(EngineError::ReadFailed {
                    reason: "scripted read failure".to_string(),
                }),
            ]
        } else {
            vec![Ok(data)]
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Engine whose answers are scripted by the test.
pub struct ScriptedEngine {
    files: Vec<(String, u64)>,
    behavior: Mutex<AddBehavior>,
    add_delay: Duration,
    metadata_delay: Duration,
    remove_delay: Duration,
    invocations: AtomicUsize,
    removals: AtomicUsize,
    packs: Mutex<HashMap<ContentId, Arc<ScriptedPack>>>,
}

impl ScriptedEngine {
    /// Engine whose packs hold `files` as (name, length) pairs.
    pub fn with_files(files: &[(&str, u64)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, length)| (name.to_string(), *length))
                .collect(),
            behavior: Mutex::new(AddBehavior::Accept),
            add_delay: Duration::ZERO,
            metadata_delay: Duration::ZERO,
            remove_delay: Duration::ZERO,
            invocations: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            packs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_behavior(self, behavior: AddBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Time `add` takes before answering.
    pub fn with_add_delay(mut self, delay: Duration) -> Self {
        self.add_delay = delay;
        self
    }

    /// Time between an accepted add and published metadata.
    pub fn with_metadata_delay(mut self, delay: Duration) -> Self {
        self.metadata_delay = delay;
        self
    }

    /// Time `remove` takes before the pack is gone.
    pub fn with_remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: AddBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Number of `add` calls so far.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn pack(&self, id: &ContentId) -> Option<Arc<ScriptedPack>> {
        self.packs.lock().get(id).cloned()
    }

    fn register(&self, id: ContentId) -> Arc<ScriptedPack> {
        let pack = Arc::new(ScriptedPack::new(id, &self.files));
        self.packs.lock().insert(id, Arc::clone(&pack));
        pack
    }

    fn settle_later(&self, pack: &Arc<ScriptedPack>, error: Option<String>) {
        let pack = Arc::clone(pack);
        let delay = self.metadata_delay;
        let settle = move || match error {
            Some(reason) => pack.fail(reason),
            None => pack.publish_metadata(),
        };
        if delay.is_zero() {
            settle();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                settle();
            });
        }
    }
}

#[async_trait]
impl ContentEngine for ScriptedEngine {
    async fn add(
        &self,
        descriptor: &ContentDescriptor,
        _hints: &EngineHints,
    ) -> Result<Arc<dyn PackHandle>, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.add_delay.is_zero() {
            tokio::time::sleep(self.add_delay).await;
        }

        let id = descriptor.id;
        let behavior = self.behavior.lock().clone();
        match behavior {
            AddBehavior::Accept => {
                let pack = self.register(id);
                self.settle_later(&pack, None);
                Ok(pack)
            }
            AddBehavior::Reject(error) => Err(error),
            AddBehavior::FailAfterAdd(reason) => {
                let pack = self.register(id);
                self.settle_later(&pack, Some(reason));
                Ok(pack)
            }
            AddBehavior::Duplicate => {
                let pack = self.register(id);
                pack.publish_metadata();
                Err(EngineError::Duplicate { id })
            }
            AddBehavior::DuplicateWithoutHandle => Err(EngineError::Duplicate { id }),
            AddBehavior::DuplicateOfFailed(reason) => {
                let pack = self.register(id);
                pack.fail(reason);
                Err(EngineError::Duplicate { id })
            }
            AddBehavior::Stall => Ok(self.register(id)),
        }
    }

    fn get(&self, id: &ContentId) -> Option<Arc<dyn PackHandle>> {
        self.pack(id).map(|pack| pack as Arc<dyn PackHandle>)
    }

    async fn remove(&self, id: &ContentId) -> Result<(), EngineError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if !self.remove_delay.is_zero() {
            tokio::time::sleep(self.remove_delay).await;
        }
        self.packs
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or(EngineError::NotFound { id: *id })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
