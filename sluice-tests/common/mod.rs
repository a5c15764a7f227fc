//! Shared harness: a gateway on an ephemeral port plus request helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sluice_core::config::SluiceConfig;
use sluice_core::engine::ContentEngine;
use sluice_web::{AppState, build_router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Identifier used by tests that need just one pack.
pub const HASH: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

/// Gateway running in the background; stopped on drop.
pub struct TestGateway {
    pub base_url: String,
    pub state: AppState,
    pub client: reqwest::Client,
    server: JoinHandle<()>,
}

impl TestGateway {
    /// Binds 127.0.0.1:0 and serves the router over `engine`. Stream URLs
    /// point at the bound address.
    pub async fn spawn(mut config: SluiceConfig, engine: Arc<dyn ContentEngine>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        config.server.public_base_url = Some(base_url.clone());

        let state = AppState::new(config, engine);
        let router = build_router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            base_url,
            state,
            client,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_range(&self, url: &str, range: &str) -> reqwest::Response {
        self.client
            .get(url)
            .header(reqwest::header::RANGE, range)
            .send()
            .await
            .unwrap()
    }

    pub async fn add(&self, descriptor: &str) -> reqwest::Response {
        self.client
            .post(self.url("/add"))
            .json(&serde_json::json!({ "descriptor": descriptor }))
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Magnet URI for `hash` with a display name.
pub fn magnet(hash: &str, name: &str) -> String {
    format!(
        "magnet:?xt=urn:btih:{hash}&dn={}",
        urlencoding::encode(name)
    )
}
