//! Range streaming through a live listener over the simulated swarm

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use serde_json::Value;
use sluice_core::config::{SimulationConfig, SluiceConfig};
use sluice_core::content::ContentId;
use sluice_core::engine::{ContentEngine, SimulatedEngine, SyntheticPack, simulated};

use crate::common::{HASH, TestGateway, magnet};

const CLIP_LEN: usize = 200 * 1024;

fn clip() -> Bytes {
    (0..CLIP_LEN)
        .map(|i| (i * 7 % 256) as u8)
        .collect::<Vec<u8>>()
        .into()
}

async fn seeded_gateway(simulation: SimulationConfig) -> (Arc<SimulatedEngine>, TestGateway) {
    let engine = Arc::new(SimulatedEngine::new(simulation));
    engine.seed_pack(
        HASH.parse().unwrap(),
        SyntheticPack {
            name: "Clip".to_string(),
            files: vec![
                ("notes.txt".to_string(), Bytes::from_static(b"release notes")),
                ("clip.mp4".to_string(), clip()),
            ],
        },
    );
    let gateway = TestGateway::spawn(
        SluiceConfig::for_testing(),
        Arc::clone(&engine) as Arc<dyn ContentEngine>,
    )
    .await;
    (engine, gateway)
}

async fn stream_url(gateway: &TestGateway) -> String {
    let response = gateway.add(&magnet(HASH, "Clip")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["file"]["name"], "clip.mp4");
    body["file"]["streamUrl"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn partial_range_returns_exact_bytes() {
    let (_engine, gateway) = seeded_gateway(SimulationConfig::deterministic_testing()).await;
    let url = stream_url(&gateway).await;
    assert!(url.starts_with(&gateway.base_url));

    let response = gateway.get_range(&url, "bytes=0-99").await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers().clone();
    assert_eq!(headers[CONTENT_LENGTH], "100");
    assert_eq!(
        headers[CONTENT_RANGE],
        format!("bytes 0-99/{CLIP_LEN}").as_str()
    );
    assert_eq!(headers[ACCEPT_RANGES], "bytes");
    assert_eq!(headers[CONTENT_TYPE], "video/mp4");

    let body = response.bytes().await.unwrap();
    assert_eq!(body, clip().slice(0..100));
}

#[tokio::test]
async fn full_request_streams_whole_file() {
    let (_engine, gateway) = seeded_gateway(SimulationConfig::deterministic_testing()).await;
    let url = stream_url(&gateway).await;

    let response = gateway.client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_LENGTH],
        CLIP_LEN.to_string().as_str()
    );
    assert!(response.headers().get(CONTENT_RANGE).is_none());
    assert_eq!(response.bytes().await.unwrap(), clip());
}

#[tokio::test]
async fn range_past_end_is_not_satisfiable() {
    let (_engine, gateway) = seeded_gateway(SimulationConfig::deterministic_testing()).await;
    let url = stream_url(&gateway).await;

    let range = format!("bytes={}-{}", CLIP_LEN, CLIP_LEN + 10);
    let response = gateway.get_range(&url, &range).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes */{CLIP_LEN}").as_str()
    );
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn tail_read_waits_for_prioritized_pieces() {
    // Slow enough that the tail is not there when the request arrives.
    let simulation = SimulationConfig {
        download_rate_bps: 64 * 1024,
        ..SimulationConfig::deterministic_testing()
    };
    let (_engine, gateway) = seeded_gateway(simulation).await;
    let url = stream_url(&gateway).await;

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        gateway.get_range(&url, "bytes=-4096"),
    )
    .await
    .expect("prioritized tail should arrive quickly");
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let body = response.bytes().await.unwrap();
    assert_eq!(body, clip().slice(CLIP_LEN - 4096..));
}

#[tokio::test]
async fn synthetic_pack_streams_deterministic_bytes() {
    let engine = Arc::new(SimulatedEngine::new(
        SimulationConfig::deterministic_testing(),
    ));
    let gateway = TestGateway::spawn(
        SluiceConfig::for_testing(),
        Arc::clone(&engine) as Arc<dyn ContentEngine>,
    )
    .await;

    let response = gateway.add(&magnet(HASH, "Synthetic")).await;
    let body: Value = response.json().await.unwrap();
    let files = body["files"].as_array().unwrap();
    let primary = body["file"]["index"].as_u64().unwrap() as usize;
    // Synthetic bytes are addressed by offset within the whole pack.
    let pack_offset: u64 = files[..primary]
        .iter()
        .map(|f| f["size"].as_u64().unwrap())
        .sum();

    let url = body["file"]["streamUrl"].as_str().unwrap();
    let bytes = gateway
        .get_range(url, "bytes=1000-1999")
        .await
        .bytes()
        .await
        .unwrap();

    let id: ContentId = HASH.parse().unwrap();
    let expected: Vec<u8> = (pack_offset + 1000..pack_offset + 2000)
        .map(|offset| simulated::synthetic_byte(&id, offset))
        .collect();
    assert_eq!(bytes.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn unknown_targets_are_not_found() {
    let (_engine, gateway) = seeded_gateway(SimulationConfig::deterministic_testing()).await;

    let response = gateway.get(&format!("/stream/{HASH}/0")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    stream_url(&gateway).await;
    let response = gateway.get(&format!("/stream/{HASH}/9")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
