//! Acquisition coordination
//!
//! An acquisition is one engine invocation for one content identifier. The
//! [`AcquisitionRegistry`] guarantees at most one is running per identifier,
//! the [`ReadinessGate`] decides when a pack is worth streaming, and
//! [`select_primary_file`] picks what to stream out of it.

pub mod handle;
pub mod readiness;
pub mod registry;
pub mod selector;

use std::time::Duration;

use serde::Serialize;

pub use handle::{Acquisition, AcquisitionSnapshot, FileEntry, PackFile};
pub use readiness::ReadinessGate;
pub use registry::AcquisitionRegistry;
pub use selector::{VIDEO_EXTENSIONS, select_primary_file};

use crate::content::{ContentId, DescriptorError};
use crate::engine::EngineError;
use crate::streaming::RangeError;

/// Lifecycle of an identifier as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AcquisitionState {
    /// Nothing tracked
    Unknown,
    /// Engine invocation in flight, metadata not known yet
    Pending,
    /// Metadata known, files can be streamed
    MetadataReady,
}

/// Errors surfaced by acquisition operations.
///
/// Cloneable so the outcome of one attempt can be handed to every request
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(#[from] DescriptorError),

    #[error("Engine failed for {id}: {source}")]
    EngineInvocation {
        id: ContentId,
        #[source]
        source: EngineError,
    },

    #[error("No playable file in {id}")]
    NoPlayableFile { id: ContentId },

    #[error("Unknown identifier {id}")]
    UnknownIdentifier { id: ContentId },

    #[error("File {index} not found in {id} ({count} files)")]
    FileNotFound {
        id: ContentId,
        index: usize,
        count: usize,
    },

    #[error("Invalid range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("Metadata for {id} did not arrive within {timeout:?}")]
    AcquisitionTimeout { id: ContentId, timeout: Duration },
}

impl AcquisitionError {
    /// Caused by client input rather than the engine.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedIdentifier(_)
                | Self::UnknownIdentifier { .. }
                | Self::FileNotFound { .. }
                | Self::InvalidRange(_)
        )
    }
}
