//! JSON API handlers for acquisitions

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sluice_core::acquisition::{
    Acquisition, AcquisitionError, AcquisitionSnapshot, AcquisitionState, FileEntry,
    select_primary_file,
};
use sluice_core::content::{ContentDescriptor, ContentId};
use sluice_core::streaming::{ByteRange, ByteRangeSource};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::server::AppState;

/// Descriptor parameter of `/add` and `/info`, in a query or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct DescriptorParams {
    #[serde(alias = "magnet")]
    pub descriptor: Option<String>,
}

/// A file as presented to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub index: usize,
    pub name: String,
    pub size: u64,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    pub success: bool,
    pub info_hash: ContentId,
    pub name: String,
    pub file: FileView,
    pub files: Vec<FileView>,
    pub progress: f64,
    pub download_speed: u64,
    pub num_peers: usize,
    /// Readiness verdict; `false` means the wait timed out
    pub ready: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
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
    pub files: Vec<FileView>,
    pub error: Option<String>,
}

/// Aggregate counters over every tracked acquisition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_acquisitions: usize,
    pub pending: usize,
    pub ready: usize,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub engine: &'static str,
    pub engine_invocations: usize,
    pub uptime_secs: u64,
}

pub async fn add_content_query(
    State(state): State<AppState>,
    Query(params): Query<DescriptorParams>,
) -> Result<Json<AddResponse>, ApiError> {
    add_content(&state, params).await.map(Json)
}

pub async fn add_content_json(
    State(state): State<AppState>,
    Json(params): Json<DescriptorParams>,
) -> Result<Json<AddResponse>, ApiError> {
    add_content(&state, params).await.map(Json)
}

/// Acquires the content, picks the file to stream, asks the engine to
/// fetch it first and waits for readiness.
async fn add_content(state: &AppState, params: DescriptorParams) -> Result<AddResponse, ApiError> {
    let acquisition = acquire(state, params).await?;
    let id = acquisition.id();

    let files = acquisition.files();
    let primary = select_primary_file(files).ok_or(AcquisitionError::NoPlayableFile { id })?;
    if let Some(whole) = ByteRange::full(primary.length) {
        if let Err(e) = acquisition.file(primary.index)?.prioritize(whole) {
            debug!("Could not prioritize {} of {}: {}", primary.name, id, e);
        }
    }

    let settings = &state.config.acquisition;
    let ready = state
        .readiness
        .wait_until_ready(
            &acquisition,
            settings.readiness_min_progress,
            settings.readiness_timeout,
        )
        .await;
    if !ready {
        warn!(
            "Acquisition {} not ready after {:?}, answering anyway",
            id, settings.readiness_timeout
        );
    }

    let status = acquisition.status();
    info!("Serving {} from {} (ready: {})", primary.name, id, ready);

    Ok(AddResponse {
        success: true,
        info_hash: id,
        name: acquisition.name(),
        file: file_view(state, id, primary),
        files: files.iter().map(|f| file_view(state, id, f)).collect(),
        progress: acquisition.progress(),
        download_speed: status.download_speed,
        num_peers: status.peers,
        ready,
    })
}

pub async fn content_info(
    State(state): State<AppState>,
    Query(params): Query<DescriptorParams>,
) -> Result<Json<InfoResponse>, ApiError> {
    let acquisition = acquire(&state, params).await?;
    let snapshot = acquisition.snapshot();
    let id = snapshot.info_hash;

    Ok(Json(InfoResponse {
        info_hash: id,
        name: snapshot.name,
        state: snapshot.state,
        progress: snapshot.progress,
        download_speed: snapshot.download_speed,
        upload_speed: snapshot.upload_speed,
        num_peers: snapshot.num_peers,
        downloaded: snapshot.downloaded,
        uploaded: snapshot.uploaded,
        length: snapshot.length,
        files: snapshot
            .files
            .iter()
            .map(|f| file_view(&state, id, f))
            .collect(),
        error: snapshot.error,
    }))
}

pub async fn content_progress(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<AcquisitionSnapshot>, ApiError> {
    let id = parse_content_id(&info_hash)?;
    state
        .registry
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| AcquisitionError::UnknownIdentifier { id }.into())
}

pub async fn list_content(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "torrents": state.registry.list() }))
}

pub async fn server_stats(State(state): State<AppState>) -> Json<Stats> {
    let snapshots = state.registry.list();
    let pending = snapshots
        .iter()
        .filter(|s| s.state == AcquisitionState::Pending)
        .count();

    Json(Stats {
        total_acquisitions: snapshots.len(),
        pending,
        ready: snapshots.len() - pending,
        download_speed: snapshots.iter().map(|s| s.download_speed).sum(),
        upload_speed: snapshots.iter().map(|s| s.upload_speed).sum(),
        downloaded: snapshots.iter().map(|s| s.downloaded).sum(),
        uploaded: snapshots.iter().map(|s| s.uploaded).sum(),
        engine: state.registry.engine_name(),
        engine_invocations: state.registry.invocation_count(),
        uptime_secs: state.server_started_at.elapsed().as_secs(),
    })
}

pub async fn remove_content(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_content_id(&info_hash)?;
    state.registry.remove(&id).await?;
    info!("Removed acquisition {}", id);
    Ok(Json(json!({ "message": format!("Removed {id}") })))
}

pub async fn service_index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "sluice",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.registry.engine_name(),
        "endpoints": {
            "POST /add": "Add content from {\"descriptor\": ...} and pick a file to stream",
            "GET /add?descriptor=": "Same as POST /add",
            "GET /info?descriptor=": "Acquire content and list all of its files",
            "GET /stream/{id}/{index}": "Stream a file, honoring Range requests",
            "GET /progress/{id}": "Live progress of one acquisition",
            "GET /torrents": "List acquisitions (alias /list)",
            "GET /stats": "Aggregate counters",
            "DELETE /remove/{id}": "Stop and forget an acquisition",
        }
    }))
}

/// Parses the descriptor parameter and runs it through the registry.
async fn acquire(
    state: &AppState,
    params: DescriptorParams,
) -> Result<std::sync::Arc<Acquisition>, ApiError> {
    let raw = params
        .descriptor
        .ok_or(ApiError::MissingParameter { name: "descriptor" })?;
    let descriptor = ContentDescriptor::parse(&raw).map_err(AcquisitionError::from)?;
    debug!("Acquiring {}", descriptor.id);

    let hints = state.hints_for(&descriptor);
    Ok(state.registry.acquire(descriptor, hints).await?)
}

pub(crate) fn parse_content_id(raw: &str) -> Result<ContentId, ApiError> {
    ContentId::from_hex(raw).map_err(|e| AcquisitionError::from(e).into())
}

fn file_view(state: &AppState, id: ContentId, entry: &FileEntry) -> FileView {
    FileView {
        index: entry.index,
        name: entry.name.clone(),
        size: entry.length,
        stream_url: state.stream_url(id, entry.index),
    }
}
