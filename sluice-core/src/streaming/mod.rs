//! Byte-range access to files inside a pack.
//!
//! The web layer streams anything implementing [`ByteRangeSource`]; the
//! acquisition module provides the implementation over engine packs.

pub mod range;

pub use range::{ByteRange, RangeError, parse_range_header};

use crate::engine::{ByteStream, EngineError};

/// Fallback MIME type for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// A file that can be read by byte range while it is still downloading.
#[allow(clippy::len_without_is_empty)]
pub trait ByteRangeSource: Send + Sync {
    /// File name, used for the content type.
    fn name(&self) -> &str;

    /// Total file length in bytes.
    fn len(&self) -> u64;

    /// Asks the engine to fetch `range` ahead of everything else.
    ///
    /// # Errors
    /// - `EngineError` - The engine rejected the hint
    fn prioritize(&self, range: ByteRange) -> Result<(), EngineError>;

    /// Opens a lazy read of `range`.
    ///
    /// # Errors
    /// - `EngineError` - The read could not be started
    fn open(&self, range: ByteRange) -> Result<ByteStream, EngineError>;
}

/// MIME type for a file name, by lowercased extension.
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        "mpg" | "mpeg" => "video/mpeg",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
