//! Library-directory engine backend
//!
//! Every top-level entry of the library directory is one pack. A plain file
//! is a single-file pack; a folder is a pack holding every regular file
//! below it, in path order. The pack identifier is the SHA-1 of the entry's
//! name relative to the library root, so the same library always produces
//! the same identifiers. Packs are complete on arrival.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    ByteStream, ContentEngine, EngineError, EngineHints, FileMeta, PackHandle, PackMetadata,
    PackStatus, locate_window,
};
use crate::content::{ContentDescriptor, ContentId};

const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Identifier of the library entry with relative name `entry_name`.
pub fn library_id(entry_name: &str) -> ContentId {
    let digest = Sha1::digest(entry_name.as_bytes());
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    ContentId::new(hash)
}

/// One scanned library entry.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub id: ContentId,
    pub metadata: Arc<PackMetadata>,
    /// Absolute path of each file, parallel to `metadata.files`
    sources: Vec<PathBuf>,
}

struct DirPack {
    entry: LibraryEntry,
    status_tx: watch::Sender<PackStatus>,
}

impl PackHandle for DirPack {
    fn id(&self) -> ContentId {
        self.entry.id
    }

    fn status(&self) -> watch::Receiver<PackStatus> {
        self.status_tx.subscribe()
    }

    fn prioritize(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<(), EngineError> {
        // Everything is local already.
        locate_window(self.entry.id, Some(&self.entry.metadata), file_index, &window).map(|_| ())
    }

    fn read(
        &self,
        file_index: usize,
        window: RangeInclusive<u64>,
    ) -> Result<ByteStream, EngineError> {
        locate_window(self.entry.id, Some(&self.entry.metadata), file_index, &window)?;
        let path = self.entry.sources[file_index].clone();
        let (start, end) = (*window.start(), *window.end());

        let state = ReadState::Closed { path, start, end };
        Ok(Box::pin(stream::unfold(Some(state), |state| async move {
            match state?.advance().await {
                Ok(Some((bytes, next))) => Some((Ok(bytes), Some(next))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })))
    }
}

enum ReadState {
    Closed { path: PathBuf, start: u64, end: u64 },
    Open { file: File, next: u64, end: u64 },
}

impl ReadState {
    async fn advance(self) -> Result<Option<(Bytes, ReadState)>, EngineError> {
        let (mut file, next, end) = match self {
            ReadState::Closed { path, start, end } => {
                let mut file = File::open(&path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                (file, start, end)
            }
            ReadState::Open { file, next, end } => (file, next, end),
        };
        if next > end {
            return Ok(None);
        }

        let wanted = (end - next + 1).min(READ_CHUNK_SIZE) as usize;
        let mut buffer = vec![0u8; wanted];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Err(EngineError::ReadFailed {
                reason: format!("unexpected end of file at byte {next}"),
            });
        }
        buffer.truncate(read);

        let next_state = ReadState::Open {
            file,
            next: next + read as u64,
            end,
        };
        Ok(Some((Bytes::from(buffer), next_state)))
    }
}

/// Content engine serving packs out of a local directory.
pub struct DirectoryEngine {
    root: PathBuf,
    catalog: HashMap<ContentId, LibraryEntry>,
    active: RwLock<HashMap<ContentId, Arc<DirPack>>>,
}

impl DirectoryEngine {
    /// Scans `root` and builds the catalog.
    ///
    /// # Errors
    /// - `EngineError::ReadFailed` - Root or a subdirectory cannot be read
    pub async fn open(root: &Path) -> Result<Self, EngineError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();

        let mut catalog = HashMap::new();
        for name in names {
            match scan_entry(root, &name).await {
                Ok(Some(entry)) => {
                    debug!(
                        "Library entry {} -> {} ({} files)",
                        name,
                        entry.id,
                        entry.metadata.files.len()
                    );
                    catalog.insert(entry.id, entry);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping library entry {}: {}", name, e),
            }
        }

        info!(
            "Directory engine opened {} with {} packs",
            root.display(),
            catalog.len()
        );
        Ok(Self {
            root: root.to_path_buf(),
            catalog,
            active: RwLock::new(HashMap::new()),
        })
    }

    /// Library root this engine serves.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All scanned entries, sorted by pack name.
    pub fn catalog(&self) -> Vec<&LibraryEntry> {
        let mut entries: Vec<_> = self.catalog.values().collect();
        entries.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        entries
    }
}

/// Builds the pack for top-level entry `name`. Returns `None` for entries
/// that are neither files nor directories, and for empty directories.
async fn scan_entry(root: &Path, name: &str) -> Result<Option<LibraryEntry>, EngineError> {
    let entry_path = root.join(name);
    let file_type = tokio::fs::metadata(&entry_path).await?;

    let mut files = Vec::new();
    let mut sources = Vec::new();

    if file_type.is_file() {
        files.push(FileMeta {
            name: name.to_string(),
            path: name.to_string(),
            length: file_type.len(),
        });
        sources.push(entry_path);
    } else if file_type.is_dir() {
        let mut found = Vec::new();
        let mut pending = vec![entry_path];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else if metadata.is_file() {
                    found.push((entry.path(), metadata.len()));
                }
            }
        }
        found.sort();

        for (path, length) in found {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(FileMeta {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: relative,
                length,
            });
            sources.push(path);
        }
        if files.is_empty() {
            return Ok(None);
        }
    } else {
        return Ok(None);
    }

    Ok(Some(LibraryEntry {
        id: library_id(name),
        metadata: Arc::new(PackMetadata {
            name: name.to_string(),
            files,
        }),
        sources,
    }))
}

#[async_trait]
impl ContentEngine for DirectoryEngine {
    async fn add(
        &self,
        descriptor: &ContentDescriptor,
        hints: &EngineHints,
    ) -> Result<Arc<dyn PackHandle>, EngineError> {
        hints.validate()?;
        let id = descriptor.id;
        let entry = self.catalog.get(&id).ok_or_else(|| EngineError::Failed {
            reason: format!("{id} is not present in the library"),
        })?;

        let mut active = self.active.write();
        if active.contains_key(&id) {
            return Err(EngineError::Duplicate { id });
        }

        let total = entry.metadata.total_length();
        let (status_tx, _) = watch::channel(PackStatus {
            metadata: Some(Arc::clone(&entry.metadata)),
            progress: 1.0,
            downloaded: total,
            ..PackStatus::default()
        });
        let pack = Arc::new(DirPack {
            entry: entry.clone(),
            status_tx,
        });
        active.insert(id, Arc::clone(&pack));

        info!("Directory engine serving {} ({})", id, entry.metadata.name);
        Ok(pack)
    }

    fn get(&self, id: &ContentId) -> Option<Arc<dyn PackHandle>> {
        self.active
            .read()
            .get(id)
            .map(|pack| Arc::clone(pack) as Arc<dyn PackHandle>)
    }

    async fn remove(&self, id: &ContentId) -> Result<(), EngineError> {
        let pack = self
            .active
            .write()
            .remove(id)
            .ok_or(EngineError::NotFound { id: *id })?;
        pack.status_tx.send_modify(|status| {
            status.error = Some("pack removed".to_string());
        });
        info!("Directory engine released {}", id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
