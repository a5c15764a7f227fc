//! HTTP `Range` header math (RFC 7233, single byte range)
//!
//! Supported forms are `bytes=start-end`, `bytes=start-` and `bytes=-suffix`.
//! Only the first range of a multi-range header is honored. An end at or
//! past the end of the file is clamped to the last byte.

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Whole file of `size` bytes, `None` for an empty file.
    pub fn full(size: u64) -> Option<Self> {
        (size > 0).then(|| Self {
            start: 0,
            end: size - 1,
        })
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a partial response.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Errors produced while resolving a `Range` header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Malformed range header: {header}")]
    Malformed { header: String },

    #[error("Range {header} not satisfiable for {size} bytes")]
    Unsatisfiable { header: String, size: u64 },
}

impl RangeError {
    /// `Content-Range` value for a 416 response.
    pub fn unsatisfied_content_range(size: u64) -> String {
        format!("bytes */{size}")
    }
}

/// Resolves a `Range` header value against a file of `size` bytes.
///
/// # Errors
/// - `RangeError::Malformed` - Not a `bytes=` range, or non-numeric bounds
/// - `RangeError::Unsatisfiable` - Start past the end, start after end,
///   zero-length suffix, or empty file
pub fn parse_range_header(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed {
        header: header.to_string(),
    };
    let unsatisfiable = || RangeError::Unsatisfiable {
        header: header.to_string(),
        size,
    };

    let (unit, ranges) = header.trim().split_once('=').ok_or_else(malformed)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(malformed());
    }

    let first = ranges.split(',').next().unwrap_or_default().trim();
    let (start_str, end_str) = first.split_once('-').ok_or_else(malformed)?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    let range = match (start_str.is_empty(), end_str.is_empty()) {
        (true, true) => return Err(malformed()),
        (true, false) => {
            let suffix = parse_bound(end_str).ok_or_else(malformed)?;
            if suffix == 0 || size == 0 {
                return Err(unsatisfiable());
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        }
        (false, true) => {
            let start = parse_bound(start_str).ok_or_else(malformed)?;
            if start >= size {
                return Err(unsatisfiable());
            }
            ByteRange {
                start,
                end: size - 1,
            }
        }
        (false, false) => {
            let start = parse_bound(start_str).ok_or_else(malformed)?;
            let end = parse_bound(end_str).ok_or_else(malformed)?;
            if start > end || start >= size {
                return Err(unsatisfiable());
            }
            ByteRange {
                start,
                end: end.min(size - 1),
            }
        }
    };
    Ok(range)
}

fn parse_bound(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
