//! Integration tests for Sluice
//!
//! Component interactions over real engines: the registry driving the
//! simulated swarm, range streaming through a live HTTP listener, and the
//! directory backend behind the gateway.

#[path = "common/mod.rs"]
mod common;

#[path = "integration/directory_gateway.rs"]
mod directory_gateway;
#[path = "integration/http_streaming.rs"]
mod http_streaming;
#[path = "integration/registry_simulation.rs"]
mod registry_simulation;
