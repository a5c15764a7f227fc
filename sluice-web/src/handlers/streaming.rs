//! Stream endpoint

use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use sluice_core::acquisition::AcquisitionError;

use super::api::parse_content_id;
use crate::error::ApiError;
use crate::server::AppState;
use crate::streaming::{RangeStreamer, StreamReply};

/// `GET /stream/{info_hash}/{file_index}`. Only resolved acquisitions can
/// be streamed; a pending one answers 404 like an unknown identifier.
///
/// # Errors
/// - `ApiError` - Bad identifier or index, unknown pack or file, engine read refusal
pub async fn stream_file(
    State(state): State<AppState>,
    Path((info_hash, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StreamReply, ApiError> {
    let id = parse_content_id(&info_hash)?;
    let index = file_index
        .parse::<usize>()
        .map_err(|_| ApiError::InvalidParameter {
            name: "file index",
            value: file_index.clone(),
        })?;

    let acquisition = state
        .registry
        .get(&id)
        .ok_or(AcquisitionError::UnknownIdentifier { id })?;
    let file = acquisition.file(index)?;

    // A non-ASCII header is as malformed as a bad unit.
    let range = headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default());

    RangeStreamer::serve(&file, range)
        .map_err(|source| AcquisitionError::EngineInvocation { id, source }.into())
}
