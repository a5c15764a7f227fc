//! Gateway over the directory backend

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use sluice_core::config::SluiceConfig;
use sluice_core::engine::ContentEngine;
use sluice_core::engine::DirectoryEngine;
use sluice_core::engine::directory::library_id;
use tempfile::TempDir;

use crate::common::TestGateway;

fn library() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Trailer.mp4"), vec![9u8; 4096]).unwrap();

    let show = dir.path().join("Show");
    std::fs::create_dir_all(show.join("Extras")).unwrap();
    std::fs::write(show.join("cover.jpg"), b"jpeg").unwrap();
    std::fs::write(show.join("episode.mkv"), (0..=255u8).collect::<Vec<u8>>()).unwrap();
    std::fs::write(show.join("Extras").join("bonus.txt"), b"bonus").unwrap();
    dir
}

async fn gateway(dir: &TempDir) -> TestGateway {
    let engine = DirectoryEngine::open(dir.path()).await.unwrap();
    TestGateway::spawn(
        SluiceConfig::for_testing(),
        Arc::new(engine) as Arc<dyn ContentEngine>,
    )
    .await
}

#[tokio::test]
async fn folder_pack_streams_its_video() {
    let dir = library();
    let gateway = gateway(&dir).await;
    let id = library_id("Show");

    let response = gateway.get(&format!("/add?descriptor={id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "Show");
    assert_eq!(body["ready"], true);
    assert_eq!(body["progress"], 1.0);
    assert_eq!(body["file"]["name"], "episode.mkv");
    assert_eq!(body["files"].as_array().unwrap().len(), 3);

    let url = body["file"]["streamUrl"].as_str().unwrap();
    let response = gateway.get_range(url, "bytes=16-31").await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        (16..=31u8).collect::<Vec<u8>>().as_slice()
    );
}

#[tokio::test]
async fn single_file_pack_streams_whole_file() {
    let dir = library();
    let gateway = gateway(&dir).await;
    let id = library_id("Trailer.mp4");

    let response = gateway.get(&format!("/add?descriptor={id}")).await;
    let body: Value = response.json().await.unwrap();
    let url = body["file"]["streamUrl"].as_str().unwrap();

    let response = gateway.client.get(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len(), 4096);
}

#[tokio::test]
async fn identifier_outside_library_is_engine_error() {
    let dir = library();
    let gateway = gateway(&dir).await;
    let id = library_id("Missing.mkv");

    let response = gateway.get(&format!("/add?descriptor={id}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let stats: Value = gateway.get("/stats").await.json().await.unwrap();
    assert_eq!(stats["engine"], "directory");
    assert_eq!(stats["totalAcquisitions"], 0);
}
