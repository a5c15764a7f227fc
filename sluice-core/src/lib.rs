//! Sluice Core - acquisition coordination for range-streaming gateways
//!
//! This crate holds everything the HTTP gateway builds on: content
//! identifiers and descriptor parsing, the content engine abstraction with
//! its backends, the single-flight acquisition registry, the readiness gate,
//! file selection, range math, configuration and tracing setup.

pub mod acquisition;
pub mod config;
pub mod content;
pub mod engine;
pub mod streaming;
pub mod tracing_setup;

pub use acquisition::{
    Acquisition, AcquisitionError, AcquisitionRegistry, AcquisitionSnapshot, AcquisitionState,
    ReadinessGate,
};
pub use config::SluiceConfig;
pub use content::{ContentDescriptor, ContentId, DescriptorError, descriptor};
pub use engine::{ContentEngine, EngineError};
pub use streaming::RangeError;

/// Core errors that can bubble up from any Sluice subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SluiceError {
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SluiceError::Descriptor(e) => format!("Invalid content descriptor: {e}"),
            SluiceError::Engine(_) => "Content engine error occurred".to_string(),
            SluiceError::Acquisition(e) => match e {
                AcquisitionError::MalformedIdentifier(inner) => {
                    format!("Invalid content descriptor: {inner}")
                }
                AcquisitionError::NoPlayableFile { id } => {
                    format!("Content {id} has no playable file")
                }
                AcquisitionError::UnknownIdentifier { id } => {
                    format!("Content {id} is not being tracked")
                }
                AcquisitionError::AcquisitionTimeout { id, .. } => {
                    format!("Timed out fetching metadata for {id}")
                }
                _ => "Acquisition error occurred".to_string(),
            },
            SluiceError::Range(_) => "Requested range cannot be served".to_string(),
            SluiceError::Configuration { reason } => format!("Configuration error: {reason}"),
            SluiceError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        match self {
            SluiceError::Descriptor(_) | SluiceError::Range(_) => true,
            SluiceError::Acquisition(e) => e.is_user_error(),
            SluiceError::Configuration { .. } => true,
            SluiceError::Engine(_) | SluiceError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SluiceError>;
