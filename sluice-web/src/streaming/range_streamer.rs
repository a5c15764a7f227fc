//! Range request serving over any `ByteRangeSource`

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use sluice_core::engine::EngineError;
use sluice_core::streaming::{
    ByteRange, ByteRangeSource, RangeError, content_type_for, parse_range_header,
};
use tracing::{debug, warn};

/// Status, headers and lazily produced body of a stream response.
pub struct StreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl IntoResponse for StreamReply {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Answers byte-range requests against a single file.
pub struct RangeStreamer;

impl RangeStreamer {
    /// Builds the reply for `range_header` (the raw `Range` value, if any).
    ///
    /// Unparseable or unsatisfiable ranges produce a 416 reply carrying
    /// `Content-Range: bytes */size`, not an error. An end at or past the
    /// end of the file is clamped to the last byte and served as 206, the
    /// way common range parsers treat it; only a start past the end is
    /// unsatisfiable.
    ///
    /// # Errors
    /// - `EngineError` - The source refused to open the requested window
    pub fn serve(
        file: &dyn ByteRangeSource,
        range_header: Option<&str>,
    ) -> Result<StreamReply, EngineError> {
        let size = file.len();
        let content_type = content_type_for(file.name());

        let (status, range) = match range_header {
            None => (StatusCode::OK, ByteRange::full(size)),
            Some(value) => match parse_range_header(value, size) {
                Ok(range) => (StatusCode::PARTIAL_CONTENT, Some(range)),
                Err(e) => return Ok(Self::unsatisfiable(&e, size, content_type)),
            },
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let Some(range) = range else {
            // Empty file, no Range header.
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
            return Ok(StreamReply {
                status,
                headers,
                body: Body::empty(),
            });
        };

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
        if status == StatusCode::PARTIAL_CONTENT {
            headers.insert(
                header::CONTENT_RANGE,
                header_value(&range.content_range(size)),
            );
        }

        if let Err(e) = file.prioritize(range) {
            debug!(
                "Prioritizing {}-{} of {} failed: {}",
                range.start,
                range.end,
                file.name(),
                e
            );
        }

        let name = file.name().to_string();
        let stream = file.open(range)?.inspect_err(move |e| {
            warn!("Stream of {} aborted: {}", name, e);
        });

        debug!(
            "Serving {} {}-{}/{} of {}",
            status.as_u16(),
            range.start,
            range.end,
            size,
            file.name()
        );

        Ok(StreamReply {
            status,
            headers,
            body: Body::from_stream(stream),
        })
    }

    fn unsatisfiable(error: &RangeError, size: u64, content_type: &'static str) -> StreamReply {
        debug!("Rejecting range request: {}", error);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        headers.insert(
            header::CONTENT_RANGE,
            header_value(&RangeError::unsatisfied_content_range(size)),
        );
        StreamReply {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            headers,
            body: Body::empty(),
        }
    }
}

fn header_value(value: &str) -> HeaderValue {
    // Content-Range values are ASCII digits, spaces and `-*/`.
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("bytes */0"))
}
