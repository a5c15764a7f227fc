//! Route tests for the gateway router.
//!
//! Every request goes through `build_router` with a scripted engine, so the
//! full extractor, handler and error mapping path is exercised.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use sluice_core::config::SluiceConfig;
use sluice_core::content::ContentId;
use sluice_core::engine::{ContentEngine, EngineError};
use sluice_core::engine::test_mocks::{AddBehavior, ScriptedEngine, pattern_byte};
use sluice_web::{AppState, build_router};
use tower::ServiceExt;

const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

fn magnet() -> String {
    format!("magnet:?xt=urn:btih:{HASH}&dn=Example.Pack")
}

fn pack_files() -> ScriptedEngine {
    ScriptedEngine::with_files(&[
        ("Example.Pack.nfo", 512),
        ("Example.Pack.mkv", 10_000),
        ("Example.Pack.srt", 2_000),
    ])
}

fn app(engine: &Arc<ScriptedEngine>) -> Router {
    let mut config = SluiceConfig::for_testing();
    config.server.public_base_url = Some("http://gateway.test/".to_string());
    build_router(AppState::new(config, Arc::clone(engine) as Arc<dyn ContentEngine>))
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    send(
        app,
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn add_selects_first_video_and_builds_stream_urls() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    let response = post_json(&app, "/add", json!({ "descriptor": magnet() })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["infoHash"], HASH);
    assert_eq!(body["ready"], true);
    assert_eq!(body["file"]["index"], 1);
    assert_eq!(body["file"]["name"], "Example.Pack.mkv");
    assert_eq!(body["file"]["size"], 10_000);
    assert_eq!(
        body["file"]["streamUrl"],
        format!("http://gateway.test/stream/{HASH}/1")
    );
    assert_eq!(body["files"].as_array().unwrap().len(), 3);
    assert_eq!(engine.invocation_count(), 1);

    // The selected file is handed to the engine before any stream request.
    let id: ContentId = HASH.parse().unwrap();
    assert_eq!(engine.pack(&id).unwrap().prioritized(), vec![(1, 0..=9_999)]);
}

#[tokio::test]
async fn add_via_query_accepts_magnet_alias_and_reuses_acquisition() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    let uri = format!("/add?magnet={}", urlencoding::encode(&magnet()));

    let first = get(&app, &uri).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = get(&app, &format!("/add?descriptor={HASH}")).await;
    assert_eq!(second.status(), StatusCode::OK);

    let first = json_body(first).await;
    let second = json_body(second).await;
    assert_eq!(first["files"], second["files"]);
    assert_eq!(engine.invocation_count(), 1);
}

#[tokio::test]
async fn add_without_descriptor_is_bad_request() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    let response = get(&app, "/add").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("descriptor"));
    assert_eq!(engine.invocation_count(), 0);
}

#[tokio::test]
async fn malformed_descriptor_never_reaches_engine() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    for bad in [
        json!({ "descriptor": "magnet:?dn=NoTopic" }),
        json!({ "descriptor": "not-a-descriptor" }),
        json!({ "magnet": "magnet:?xt=urn:btih:ABCDEFGHIJKLMNOPQRSTUVWXYZ234567" }),
    ] {
        let response = post_json(&app, "/add", bad).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }
    assert_eq!(engine.invocation_count(), 0);
}

#[tokio::test]
async fn engine_rejection_is_500_and_retry_invokes_again() {
    let engine = Arc::new(pack_files().with_behavior(AddBehavior::Reject(EngineError::Failed {
        reason: "disk full".to_string(),
    })));
    let app = app(&engine);

    let response = get(&app, &format!("/add?descriptor={HASH}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        json_body(response).await["error"]
            .as_str()
            .unwrap()
            .contains("disk full")
    );

    engine.set_behavior(AddBehavior::Accept);
    let response = get(&app, &format!("/add?descriptor={HASH}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(engine.invocation_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn metadata_timeout_is_gateway_timeout() {
    let engine = Arc::new(pack_files().with_behavior(AddBehavior::Stall));
    let app = app(&engine);

    let response = get(&app, &format!("/add?descriptor={HASH}")).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let progress = get(&app, &format!("/progress/{HASH}")).await;
    assert_eq!(progress.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_pack_has_no_playable_file() {
    let engine = Arc::new(ScriptedEngine::with_files(&[]));
    let app = app(&engine);

    let response = get(&app, &format!("/add?descriptor={HASH}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["files"], json!([]));
}

#[tokio::test]
async fn info_lists_every_file_with_counters() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    let response = get(&app, &format!("/info?descriptor={HASH}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["infoHash"], HASH);
    assert_eq!(body["state"], "metadataReady");
    assert_eq!(body["length"], 12_512);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(
        files[2]["streamUrl"],
        format!("http://gateway.test/stream/{HASH}/2")
    );
}

#[tokio::test]
async fn stream_honors_range_requests() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    get(&app, &format!("/add?descriptor={HASH}")).await;

    let partial = send(
        &app,
        Request::builder()
            .uri(format!("/stream/{HASH}/1"))
            .header(header::RANGE, "bytes=0-99")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.headers()[header::CONTENT_LENGTH], "100");
    assert_eq!(partial.headers()[header::CONTENT_RANGE], "bytes 0-99/10000");
    assert_eq!(partial.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(partial.headers()[header::CONTENT_TYPE], "video/x-matroska");
    let bytes = axum::body::to_bytes(partial.into_body(), usize::MAX)
        .await
        .unwrap();
    let expected: Vec<u8> = (0..100).map(pattern_byte).collect();
    assert_eq!(bytes.as_ref(), expected.as_slice());

    let id: ContentId = HASH.parse().unwrap();
    let prioritized = engine.pack(&id).unwrap().prioritized();
    assert_eq!(prioritized, vec![(1, 0..=9_999), (1, 0..=99)]);

    let full = get(&app, &format!("/stream/{HASH}/1")).await;
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.headers()[header::CONTENT_LENGTH], "10000");
}

#[tokio::test]
async fn read_failure_cuts_stream_and_later_requests_recover() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    get(&app, &format!("/add?descriptor={HASH}")).await;
    let id: ContentId = HASH.parse().unwrap();
    let pack = engine.pack(&id).unwrap();

    let ranged = |range: &'static str| {
        Request::builder()
            .uri(format!("/stream/{HASH}/1"))
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap()
    };

    pack.fail_reads();
    let broken = send(&app, ranged("bytes=0-99")).await;
    // Headers are already out when the engine fails, so the body is cut.
    assert_eq!(broken.status(), StatusCode::PARTIAL_CONTENT);
    assert!(
        axum::body::to_bytes(broken.into_body(), usize::MAX)
            .await
            .is_err()
    );

    pack.restore_reads();
    let healthy = send(&app, ranged("bytes=100-199")).await;
    assert_eq!(healthy.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = axum::body::to_bytes(healthy.into_body(), usize::MAX)
        .await
        .unwrap();
    let expected: Vec<u8> = (100..200).map(pattern_byte).collect();
    assert_eq!(bytes.as_ref(), expected.as_slice());

    let progress = get(&app, &format!("/progress/{HASH}")).await;
    assert_eq!(progress.status(), StatusCode::OK);
}

#[tokio::test]
async fn stream_range_past_end_is_416() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    get(&app, &format!("/add?descriptor={HASH}")).await;

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/stream/{HASH}/1"))
            .header(header::RANGE, "bytes=10000-10010")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10000");
}

#[tokio::test]
async fn stream_rejects_unknown_and_malformed_targets() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    let unknown = get(&app, &format!("/stream/{HASH}/0")).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let bad_id = get(&app, "/stream/not-a-hash/0").await;
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

    get(&app, &format!("/add?descriptor={HASH}")).await;
    let bad_index = get(&app, &format!("/stream/{HASH}/first")).await;
    assert_eq!(bad_index.status(), StatusCode::BAD_REQUEST);

    let missing_file = get(&app, &format!("/stream/{HASH}/7")).await;
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_list_and_stats_reflect_acquisitions() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    get(&app, &format!("/add?descriptor={HASH}")).await;

    let id: ContentId = HASH.parse().unwrap();
    engine.pack(&id).unwrap().set_progress(0.25);

    let progress = json_body(get(&app, &format!("/progress/{HASH}")).await).await;
    assert_eq!(progress["state"], "metadataReady");
    assert_eq!(progress["progress"], 0.25);
    assert_eq!(progress["numPeers"], 3);

    for uri in ["/torrents", "/list"] {
        let list = json_body(get(&app, uri).await).await;
        let torrents = list["torrents"].as_array().unwrap();
        assert_eq!(torrents.len(), 1);
        assert_eq!(torrents[0]["infoHash"], HASH);
    }

    let stats = json_body(get(&app, "/stats").await).await;
    assert_eq!(stats["totalAcquisitions"], 1);
    assert_eq!(stats["ready"], 1);
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["engineInvocations"], 1);
}

#[tokio::test]
async fn remove_releases_then_reports_unknown() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);
    get(&app, &format!("/add?descriptor={HASH}")).await;

    let remove = || {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/remove/{HASH}"))
            .body(Body::empty())
            .unwrap()
    };

    let first = send(&app, remove()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(json_body(first).await["message"].is_string());
    assert_eq!(engine.removal_count(), 1);

    let second = send(&app, remove()).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);

    let stream = get(&app, &format!("/stream/{HASH}/1")).await;
    assert_eq!(stream.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn index_lists_endpoints() {
    let engine = Arc::new(pack_files());
    let app = app(&engine);

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "sluice");
    assert!(body["endpoints"]["GET /stream/{id}/{index}"].is_string());
}

#[tokio::test(start_paused = true)]
async fn concurrent_adds_share_one_engine_invocation() {
    let engine = Arc::new(pack_files().with_add_delay(Duration::from_millis(200)));
    let app = app(&engine);

    let uri = format!("/add?descriptor={HASH}");
    let responses = futures::future::join_all((0..4).map(|_| get(&app, &uri))).await;

    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(engine.invocation_count(), 1);
}
