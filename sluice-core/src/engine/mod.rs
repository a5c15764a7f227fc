//! Content-fetch engine abstraction
//!
//! The gateway never talks to peers, trackers or the DHT itself. It consumes
//! an engine through [`ContentEngine`]: hand it a descriptor plus announce
//! hints, get back a [`PackHandle`] whose status channel reports metadata,
//! progress and errors, and whose files can be read by byte range while the
//! download is still running.

pub mod directory;
pub mod guard;
pub mod simulated;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::watch;
use url::Url;

pub use directory::DirectoryEngine;
pub use guard::{catch_panic, spawn_guarded};
pub use simulated::{SimulatedEngine, SyntheticPack};

use crate::config::{EngineBackend, EngineConfig};
use crate::content::{ContentDescriptor, ContentId};

/// Lazily produced file bytes. Polling suspends until the engine has the
/// next bytes locally; an `Err` item ends the stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

/// Errors reported by a content engine.
///
/// Cloneable so a single failure can be handed to every waiter of an
/// acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("Invalid endpoint hint: {reason}")]
    InvalidHints { reason: String },

    #[error("Duplicate add for {id}")]
    Duplicate { id: ContentId },

    #[error("Content {id} not found")]
    NotFound { id: ContentId },

    #[error("Metadata for {id} is not available yet")]
    MetadataUnavailable { id: ContentId },

    #[error("File index {index} out of range ({count} files)")]
    FileIndexOutOfRange { index: usize, count: usize },

    #[error("Range {start}-{end} outside file of {length} bytes")]
    RangeOutOfBounds { start: u64, end: u64, length: u64 },

    #[error("Read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Engine failure: {reason}")]
    Failed { reason: String },

    #[error("Engine is shut down")]
    Shutdown,
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::ReadFailed {
            reason: error.to_string(),
        }
    }
}

/// A file inside a pack as described by the engine's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// File name without directories
    pub name: String,
    /// Path relative to the pack root
    pub path: String,
    /// Length in bytes
    pub length: u64,
}

/// Pack metadata. Arrives once and does not change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackMetadata {
    pub name: String,
    pub files: Vec<FileMeta>,
}

impl PackMetadata {
    /// Total length of all files.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// Offset of a file's first byte within the concatenated pack.
    pub fn file_offset(&self, index: usize) -> Option<u64> {
        (index < self.files.len()).then(|| self.files[..index].iter().map(|f| f.length).sum())
    }
}

/// Point-in-time engine view of one pack.
#[derive(Debug, Clone, Default)]
pub struct PackStatus {
    /// `None` until metadata has been fetched
    pub metadata: Option<Arc<PackMetadata>>,
    /// Fraction of the pack held locally (0.0 to 1.0)
    pub progress: f64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub peers: usize,
    /// Set when the engine gave up on this pack
    pub error: Option<String>,
}

/// Announce endpoints handed to the engine along with a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineHints {
    pub announce: Vec<String>,
}

impl EngineHints {
    /// Descriptor trackers first, then defaults, without duplicates.
    pub fn merged(descriptor: &ContentDescriptor, defaults: &[String]) -> Self {
        let mut announce: Vec<String> = Vec::new();
        for tracker in descriptor.trackers.iter().chain(defaults) {
            if !announce.contains(tracker) {
                announce.push(tracker.clone());
            }
        }
        Self { announce }
    }

    /// Checks every endpoint is an absolute udp/http/https/ws/wss URL.
    ///
    /// # Errors
    /// - `EngineError::InvalidHints` - An endpoint fails to parse or has another scheme
    pub fn validate(&self) -> Result<(), EngineError> {
        for endpoint in &self.announce {
            let url = Url::parse(endpoint).map_err(|e| EngineError::InvalidHints {
                reason: format!("{endpoint}: {e}"),
            })?;
            if !matches!(url.scheme(), "udp" | "http" | "https" | "ws" | "wss") {
                return Err(EngineError::InvalidHints {
                    reason: format!("{endpoint}: unsupported scheme {}", url.scheme()),
                });
            }
        }
        Ok(())
    }
}

/// Content-fetch engine consumed by the acquisition registry.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    /// Registers a pack and starts fetching it. Returns as soon as the
    /// engine has accepted the work; metadata arrives later on the pack's
    /// status channel.
    ///
    /// # Errors
    /// - `EngineError::Duplicate` - The engine already tracks this identifier
    /// - `EngineError::InvalidDescriptor` / `InvalidHints` - Structural rejection
    async fn add(
        &self,
        descriptor: &ContentDescriptor,
        hints: &EngineHints,
    ) -> Result<Arc<dyn PackHandle>, EngineError>;

    /// Engine's own handle for an identifier, if it tracks one.
    fn get(&self, id: &ContentId) -> Option<Arc<dyn PackHandle>>;

    /// Stops fetching and releases everything held for the pack.
    ///
    /// # Errors
    /// - `EngineError::NotFound` - Identifier not tracked
    async fn remove(&self, id: &ContentId) -> Result<(), EngineError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// One pack inside an engine.
pub trait PackHandle: Send + Sync {
    fn id(&self) -> ContentId;

    /// Subscribes to status updates. The receiver starts at the latest value.
    fn status(&self) -> watch::Receiver<PackStatus>;

    /// Hints that bytes `window` of file `file_index` are wanted next.
    ///
    /// # Errors
    /// - `EngineError::MetadataUnavailable` - Metadata not fetched yet
    /// - `EngineError::FileIndexOutOfRange` - No such file
    fn prioritize(&self, file_index: usize, window: RangeInclusive<u64>)
    -> Result<(), EngineError>;

    /// Opens a lazy read of bytes `window` (inclusive) of file `file_index`.
    ///
    /// # Errors
    /// - `EngineError::MetadataUnavailable` - Metadata not fetched yet
    /// - `EngineError::FileIndexOutOfRange` - No such file
    /// - `EngineError::RangeOutOfBounds` - Window exceeds the file
    fn read(&self, file_index: usize, window: RangeInclusive<u64>)
    -> Result<ByteStream, EngineError>;
}

/// Checks `window` against metadata and returns the file's pack offset
/// and length. Shared by the engine backends.
pub(crate) fn locate_window(
    id: ContentId,
    metadata: Option<&PackMetadata>,
    file_index: usize,
    window: &RangeInclusive<u64>,
) -> Result<(u64, u64), EngineError> {
    let metadata = metadata.ok_or(EngineError::MetadataUnavailable { id })?;
    let file = metadata
        .files
        .get(file_index)
        .ok_or(EngineError::FileIndexOutOfRange {
            index: file_index,
            count: metadata.files.len(),
        })?;

    let (start, end) = (*window.start(), *window.end());
    if start > end || end >= file.length {
        return Err(EngineError::RangeOutOfBounds {
            start,
            end,
            length: file.length,
        });
    }

    let offset = metadata.file_offset(file_index).unwrap_or_default();
    Ok((offset, file.length))
}

/// Builds the engine selected by configuration.
///
/// # Errors
/// - `EngineError::Failed` - Directory backend without a library directory
/// - `EngineError::ReadFailed` - Library directory cannot be scanned
pub async fn build_engine(config: &EngineConfig) -> Result<Arc<dyn ContentEngine>, EngineError> {
    match config.backend {
        EngineBackend::Simulated => Ok(Arc::new(SimulatedEngine::new(config.simulation.clone()))),
        EngineBackend::Directory => {
            let dir = config.library_dir.as_ref().ok_or_else(|| EngineError::Failed {
                reason: "directory backend needs a library directory".to_string(),
            })?;
            let engine = DirectoryEngine::open(dir).await?;
            Ok(Arc::new(engine))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with_trackers(trackers: &[&str]) -> ContentDescriptor {
        ContentDescriptor {
            id: ContentId::new([1; 20]),
            display_name: None,
            trackers: trackers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_hints_merge_keeps_order_and_dedupes() {
        let descriptor = descriptor_with_trackers(&["udp://a:1", "udp://b:2"]);
        let defaults = vec!["udp://b:2".to_string(), "udp://c:3".to_string()];

        let hints = EngineHints::merged(&descriptor, &defaults);
        assert_eq!(hints.announce, vec!["udp://a:1", "udp://b:2", "udp://c:3"]);
    }

    #[test]
    fn test_hints_validation_rejects_unknown_scheme() {
        let hints = EngineHints {
            announce: vec!["ftp://tracker.example.com".to_string()],
        };
        assert!(matches!(
            hints.validate(),
            Err(EngineError::InvalidHints { .. })
        ));
    }

    #[test]
    fn test_hints_validation_rejects_relative_url() {
        let hints = EngineHints {
            announce: vec!["not a url".to_string()],
        };
        assert!(hints.validate().is_err());
    }

    #[test]
    fn test_file_offset_sums_previous_files() {
        let metadata = PackMetadata {
            name: "pack".to_string(),
            files: vec![
                FileMeta {
                    name: "a".to_string(),
                    path: "pack/a".to_string(),
                    length: 10,
                },
                FileMeta {
                    name: "b".to_string(),
                    path: "pack/b".to_string(),
                    length: 20,
                },
            ],
        };
        assert_eq!(metadata.file_offset(0), Some(0));
        assert_eq!(metadata.file_offset(1), Some(10));
        assert_eq!(metadata.file_offset(2), None);
        assert_eq!(metadata.total_length(), 30);
    }

    #[test]
    fn test_locate_window_bounds() {
        let id = ContentId::new([2; 20]);
        let metadata = PackMetadata {
            name: "pack".to_string(),
            files: vec![FileMeta {
                name: "a.mp4".to_string(),
                path: "a.mp4".to_string(),
                length: 100,
            }],
        };

        assert_eq!(locate_window(id, Some(&metadata), 0, &(0..=99)), Ok((0, 100)));
        assert!(matches!(
            locate_window(id, Some(&metadata), 0, &(50..=100)),
            Err(EngineError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            locate_window(id, Some(&metadata), 3, &(0..=1)),
            Err(EngineError::FileIndexOutOfRange { index: 3, count: 1 })
        ));
        assert!(matches!(
            locate_window(id, None, 0, &(0..=1)),
            Err(EngineError::MetadataUnavailable { .. })
        ));
    }
}
