//! End-to-end tests for Sluice
//!
//! Complete client workflows over HTTP against a gateway backed by the
//! simulated swarm: add, inspect, stream, watch progress, remove.

#[path = "../common/mod.rs"]
mod common;

mod streaming_workflow;
