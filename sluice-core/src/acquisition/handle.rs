//! Handle over one engine pack

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::{AcquisitionError, AcquisitionState};
use crate::content::ContentId;
use crate::engine::{ByteStream, EngineError, PackHandle, PackMetadata, PackStatus};
use crate::streaming::{ByteRange, ByteRangeSource};

/// A file of a pack. Index is the stable 0-based position in the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub index: usize,
    pub name: String,
    pub path: String,
    pub length: u64,
}

/// Point-in-time view of an acquisition, as reported by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionSnapshot {
    pub info_hash: ContentId,
    pub name: String,
    pub state: AcquisitionState,
    pub progress: f64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub num_peers: usize,
    pub downloaded: u64,
    pub uploaded: u64,
    pub length: u64,
    pub files: Vec<FileEntry>,
    pub error: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl AcquisitionSnapshot {
    /// Snapshot of an attempt that has no engine pack yet.
    pub fn pending(id: ContentId, name: Option<&str>, started_at: DateTime<Utc>) -> Self {
        Self {
            info_hash: id,
            name: name.map_or_else(|| id.to_string(), str::to_string),
            state: AcquisitionState::Pending,
            progress: 0.0,
            download_speed: 0,
            upload_speed: 0,
            num_peers: 0,
            downloaded: 0,
            uploaded: 0,
            length: 0,
            files: Vec::new(),
            error: None,
            added_at: started_at,
        }
    }
}

/// One engine invocation and everything observed about it.
///
/// The file list is captured once when metadata first shows up and never
/// changes afterwards. Progress only ever moves forward, even if the engine
/// reports a lower value later (e.g. after re-verifying pieces).
pub struct Acquisition {
    id: ContentId,
    pack: Arc<dyn PackHandle>,
    status: watch::Receiver<PackStatus>,
    files: OnceLock<Vec<FileEntry>>,
    metadata: OnceLock<Arc<PackMetadata>>,
    /// Bit pattern of the highest non-negative progress seen
    max_progress: AtomicU64,
    display_name: Option<String>,
    added_at: DateTime<Utc>,
}

impl Acquisition {
    pub fn new(pack: Arc<dyn PackHandle>, display_name: Option<String>) -> Self {
        Self {
            id: pack.id(),
            status: pack.status(),
            pack,
            files: OnceLock::new(),
            metadata: OnceLock::new(),
            max_progress: AtomicU64::new(0f64.to_bits()),
            display_name,
            added_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ContentId {
        self.id
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// Pack name from metadata, else the descriptor's display name, else
    /// the identifier.
    pub fn name(&self) -> String {
        if let Some(metadata) = self.metadata() {
            return metadata.name.clone();
        }
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Waits until the engine publishes metadata.
    ///
    /// # Errors
    /// - `AcquisitionError::EngineInvocation` - Engine reported a pack error or shut down
    /// - `AcquisitionError::AcquisitionTimeout` - Nothing arrived within `timeout`
    pub async fn wait_for_metadata(&self, timeout: Duration) -> Result<(), AcquisitionError> {
        let mut status = self.status.clone();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                {
                    let current = status.borrow_and_update();
                    if let Some(metadata) = &current.metadata {
                        self.capture(metadata);
                        return Ok(());
                    }
                    if let Some(reason) = &current.error {
                        return Err(EngineError::Failed {
                            reason: reason.clone(),
                        });
                    }
                }
                if status.changed().await.is_err() {
                    return Err(EngineError::Shutdown);
                }
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(AcquisitionError::EngineInvocation {
                id: self.id,
                source,
            }),
            Err(_) => Err(AcquisitionError::AcquisitionTimeout {
                id: self.id,
                timeout,
            }),
        }
    }

    fn capture(&self, metadata: &Arc<PackMetadata>) -> &[FileEntry] {
        let _ = self.metadata.set(Arc::clone(metadata));
        self.files.get_or_init(|| {
            metadata
                .files
                .iter()
                .enumerate()
                .map(|(index, file)| FileEntry {
                    index,
                    name: file.name.clone(),
                    path: file.path.clone(),
                    length: file.length,
                })
                .collect()
        })
    }

    fn metadata(&self) -> Option<Arc<PackMetadata>> {
        if let Some(metadata) = self.metadata.get() {
            return Some(Arc::clone(metadata));
        }
        let metadata = self.status.borrow().metadata.clone()?;
        self.capture(&metadata);
        Some(metadata)
    }

    /// Files of the pack, empty until metadata is known.
    pub fn files(&self) -> &[FileEntry] {
        if let Some(files) = self.files.get() {
            return files;
        }
        match self.status.borrow().metadata.clone() {
            Some(metadata) => self.capture(&metadata),
            None => &[],
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata().is_some()
    }

    /// Fraction downloaded, in `[0, 1]`, never decreasing.
    pub fn progress(&self) -> f64 {
        let reported = self.status.borrow().progress;
        let reported = if reported.is_nan() {
            0.0
        } else {
            reported.clamp(0.0, 1.0)
        };
        // Non-negative f64 bit patterns order like the values they encode.
        let previous = self
            .max_progress
            .fetch_max(reported.to_bits(), Ordering::AcqRel);
        f64::from_bits(previous.max(reported.to_bits()))
    }

    pub fn status(&self) -> PackStatus {
        self.status.borrow().clone()
    }

    /// Readable view of file `index`.
    ///
    /// # Errors
    /// - `AcquisitionError::FileNotFound` - No such file (or metadata unknown)
    pub fn file(self: &Arc<Self>, index: usize) -> Result<PackFile, AcquisitionError> {
        let files = self.files();
        let entry = files
            .get(index)
            .cloned()
            .ok_or(AcquisitionError::FileNotFound {
                id: self.id,
                index,
                count: files.len(),
            })?;
        Ok(PackFile {
            acquisition: Arc::clone(self),
            entry,
        })
    }

    pub fn snapshot(&self) -> AcquisitionSnapshot {
        let progress = self.progress();
        let status = self.status();
        let files = self.files().to_vec();
        AcquisitionSnapshot {
            info_hash: self.id,
            name: self.name(),
            state: if self.has_metadata() {
                AcquisitionState::MetadataReady
            } else {
                AcquisitionState::Pending
            },
            progress,
            download_speed: status.download_speed,
            upload_speed: status.upload_speed,
            num_peers: status.peers,
            downloaded: status.downloaded,
            uploaded: status.uploaded,
            length: files.iter().map(|file| file.length).sum(),
            files,
            error: status.error,
            added_at: self.added_at,
        }
    }
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("id", &format_args!("{}", self.id))
            .field("files", &self.files.get().map_or(0, Vec::len))
            .field("progress", &self.progress())
            .field("added_at", &self.added_at)
            .finish_non_exhaustive()
    }
}

/// One file of an acquisition, readable by byte range.
#[derive(Debug, Clone)]
pub struct PackFile {
    acquisition: Arc<Acquisition>,
    entry: FileEntry,
}

impl PackFile {
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    pub fn acquisition(&self) -> &Arc<Acquisition> {
        &self.acquisition
    }
}

impl ByteRangeSource for PackFile {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn len(&self) -> u64 {
        self.entry.length
    }

    fn prioritize(&self, range: ByteRange) -> Result<(), EngineError> {
        self.acquisition
            .pack
            .prioritize(self.entry.index, range.start..=range.end)
    }

    fn open(&self, range: ByteRange) -> Result<ByteStream, EngineError> {
        self.acquisition
            .pack
            .read(self.entry.index, range.start..=range.end)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::content::ContentDescriptor;
    use crate::engine::test_mocks::{AddBehavior, ScriptedEngine, pattern_byte};
    use crate::engine::{ContentEngine, EngineHints};

    async fn scripted_acquisition(
        behavior: AddBehavior,
    ) -> (ScriptedEngine, Arc<Acquisition>) {
        let engine =
            ScriptedEngine::with_files(&[("movie.mkv", 1000), ("info.txt", 10)]).with_behavior(behavior);
        let descriptor = ContentDescriptor::from_id(ContentId::new([3; 20]));
        let pack = engine
            .add(&descriptor, &EngineHints::default())
            .await
            .unwrap();
        (engine, Arc::new(Acquisition::new(pack, Some("Movie".into()))))
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let (engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        let pack = engine.pack(&acquisition.id()).unwrap();

        pack.set_progress(0.4);
        assert_eq!(acquisition.progress(), 0.4);

        pack.set_progress(0.2);
        assert_eq!(acquisition.progress(), 0.4);

        pack.set_progress(0.9);
        assert_eq!(acquisition.progress(), 0.9);
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let (engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        let pack = engine.pack(&acquisition.id()).unwrap();

        pack.set_progress(f64::NAN);
        assert_eq!(acquisition.progress(), 0.0);

        pack.set_progress(-3.0);
        assert_eq!(acquisition.progress(), 0.0);

        pack.set_progress(1.7);
        assert_eq!(acquisition.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_files_empty_until_metadata() {
        let (engine, acquisition) = scripted_acquisition(AddBehavior::Stall).await;
        assert!(acquisition.files().is_empty());
        assert!(!acquisition.has_metadata());
        assert_eq!(acquisition.name(), "Movie");
        assert_eq!(acquisition.snapshot().state, AcquisitionState::Pending);

        engine.pack(&acquisition.id()).unwrap().publish_metadata();

        let files = acquisition.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].index, 1);
        assert_eq!(files[1].name, "info.txt");
        assert!(acquisition.name().starts_with("scripted-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_metadata_outcomes() {
        let (_engine, ready) = scripted_acquisition(AddBehavior::Accept).await;
        ready.wait_for_metadata(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ready.files().len(), 2);

        let (_engine, failing) =
            scripted_acquisition(AddBehavior::FailAfterAdd("tracker refused".into())).await;
        let error = failing
            .wait_for_metadata(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AcquisitionError::EngineInvocation {
                source: EngineError::Failed { .. },
                ..
            }
        ));

        let (_engine, stalled) = scripted_acquisition(AddBehavior::Stall).await;
        let error = stalled
            .wait_for_metadata(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(error, AcquisitionError::AcquisitionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_reports_counters() {
        let (engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        engine.pack(&acquisition.id()).unwrap().set_progress(0.5);

        let snapshot = acquisition.snapshot();
        assert_eq!(snapshot.state, AcquisitionState::MetadataReady);
        assert_eq!(snapshot.length, 1010);
        assert_eq!(snapshot.progress, 0.5);
        assert_eq!(snapshot.downloaded, 505);
        assert_eq!(snapshot.num_peers, 3);
        assert_eq!(snapshot.files.len(), 2);
    }

    #[tokio::test]
    async fn test_pack_file_reads_and_prioritizes() {
        let (engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        let file = acquisition.file(0).unwrap();
        assert_eq!(file.len(), 1000);
        assert_eq!(file.name(), "movie.mkv");

        let range = ByteRange { start: 300, end: 309 };
        file.prioritize(range).unwrap();
        let chunks: Vec<_> = file.open(range).unwrap().collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();

        assert_eq!(bytes, (300..=309).map(pattern_byte).collect::<Vec<_>>());
        assert_eq!(
            engine.pack(&acquisition.id()).unwrap().prioritized(),
            vec![(0, 300..=309)]
        );
    }

    #[tokio::test]
    async fn test_debug_names_the_pack() {
        let (_engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        acquisition.wait_for_metadata(Duration::from_secs(1)).await.unwrap();

        let rendered = format!("{acquisition:?}");
        assert!(rendered.contains(&acquisition.id().to_string()));
        assert!(rendered.contains("files: 2"));
    }

    #[tokio::test]
    async fn test_missing_file_index() {
        let (_engine, acquisition) = scripted_acquisition(AddBehavior::Accept).await;
        assert!(matches!(
            acquisition.file(7),
            Err(AcquisitionError::FileNotFound {
                index: 7,
                count: 2,
                ..
            })
        ));
    }
}
