//! Add -> stream -> progress -> remove over HTTP

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::Value;
use sluice_core::config::SluiceConfig;
use sluice_core::engine::{ContentEngine, SimulatedEngine};

use crate::common::{HASH, TestGateway, magnet};

async fn simulated_gateway() -> (Arc<SimulatedEngine>, TestGateway) {
    let config = SluiceConfig::for_testing();
    let engine = Arc::new(SimulatedEngine::new(config.engine.simulation.clone()));
    let gateway =
        TestGateway::spawn(config, Arc::clone(&engine) as Arc<dyn ContentEngine>).await;
    (engine, gateway)
}

async fn json(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}

#[tokio::test]
async fn full_acquisition_lifecycle() {
    let (engine, gateway) = simulated_gateway().await;

    // Add
    let added = gateway.add(&magnet(HASH, "Big Buck Bunny")).await;
    assert_eq!(added.status(), StatusCode::OK);
    let added = json(added).await;
    assert_eq!(added["success"], true);
    assert_eq!(added["infoHash"], HASH);
    assert_eq!(added["name"], "Big Buck Bunny");
    assert_eq!(added["file"]["name"], "Big Buck Bunny.mkv");
    let stream_url = added["file"]["streamUrl"].as_str().unwrap().to_string();
    assert_eq!(stream_url, gateway.url(&format!("/stream/{HASH}/1")));

    // Info reuses the acquisition
    let info = json(gateway.get(&format!("/info?descriptor={HASH}")).await).await;
    assert_eq!(info["state"], "metadataReady");
    assert_eq!(info["files"].as_array().unwrap().len(), 3);
    let size = info["files"][1]["size"].as_u64().unwrap();

    // Stream the opening and the tail of the video
    let head = gateway.get_range(&stream_url, "bytes=0-1023").await;
    assert_eq!(head.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(head.bytes().await.unwrap().len(), 1024);

    let tail = gateway.get_range(&stream_url, "bytes=-512").await;
    assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        tail.headers()[reqwest::header::CONTENT_RANGE],
        format!("bytes {}-{}/{}", size - 512, size - 1, size).as_str()
    );

    // Progress climbs to completion
    let mut last = 0.0;
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let progress = json(gateway.get(&format!("/progress/{HASH}")).await).await;
            let value = progress["progress"].as_f64().unwrap();
            assert!(value >= last, "progress went from {last} to {value}");
            last = value;
            if value >= 1.0 {
                assert_eq!(progress["numPeers"], 0);
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("download should complete");

    // Listing and stats
    let listed = json(gateway.get("/torrents").await).await;
    assert_eq!(listed["torrents"][0]["infoHash"], HASH);
    let stats = json(gateway.get("/stats").await).await;
    assert_eq!(stats["engine"], "simulated");
    assert_eq!(stats["engineInvocations"], 1);

    // Remove
    let removed = gateway
        .client
        .delete(gateway.url(&format!("/remove/{HASH}")))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::OK);
    assert_eq!(engine.pack_count(), 0);

    assert_eq!(
        gateway.get_range(&stream_url, "bytes=0-10").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        gateway.get(&format!("/progress/{HASH}")).await.status(),
        StatusCode::NOT_FOUND
    );

    // Re-adding starts a fresh engine invocation
    let again = gateway.add(HASH).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(gateway.state.registry.invocation_count(), 2);
}

#[tokio::test]
async fn concurrent_clients_share_one_invocation() {
    let (engine, gateway) = simulated_gateway().await;
    let descriptor = magnet(HASH, "Popular");

    let responses = join_all((0..6).map(|_| gateway.add(&descriptor))).await;
    let mut hashes = Vec::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        hashes.push(json(response).await["infoHash"].clone());
    }

    assert!(hashes.iter().all(|h| h == HASH));
    assert_eq!(gateway.state.registry.invocation_count(), 1);
    assert_eq!(engine.pack_count(), 1);
}

#[tokio::test]
async fn failed_add_can_be_retried() {
    let (engine, gateway) = simulated_gateway().await;
    let id = HASH.parse().unwrap();
    engine.inject_failure(id, "tracker unreachable");

    let failed = gateway.add(HASH).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(failed).await;
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("tracker unreachable")
    );
    assert!(json(gateway.get("/torrents").await).await["torrents"]
        .as_array()
        .unwrap()
        .is_empty());

    engine.clear_failure(&id);
    let retried = gateway.add(HASH).await;
    assert_eq!(retried.status(), StatusCode::OK);
    assert_eq!(gateway.state.registry.invocation_count(), 2);
}

#[tokio::test]
async fn malformed_requests_are_rejected_up_front() {
    let (engine, gateway) = simulated_gateway().await;

    let base32 = gateway
        .add("magnet:?xt=urn:btih:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U")
        .await;
    assert_eq!(base32.status(), StatusCode::BAD_REQUEST);

    let missing = gateway.get("/add").await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let bad_remove = gateway
        .client
        .delete(gateway.url("/remove/xyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_remove.status(), StatusCode::BAD_REQUEST);

    assert_eq!(gateway.state.registry.invocation_count(), 0);
    assert_eq!(engine.pack_count(), 0);
}

#[tokio::test]
async fn service_index_describes_endpoints() {
    let (_engine, gateway) = simulated_gateway().await;
    let index = json(gateway.get("/").await).await;
    assert_eq!(index["service"], "sluice");
    assert!(index["endpoints"].as_object().unwrap().len() >= 8);
}
