//! Sluice Web - range-streaming gateway
//!
//! JSON endpoints for acquiring content packs plus a byte-range stream
//! endpoint, served with axum over a shared acquisition registry.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]

pub mod error;
pub mod handlers;
pub mod server;
pub mod streaming;

pub use error::ApiError;
pub use server::{AppState, build_router, run_server};
