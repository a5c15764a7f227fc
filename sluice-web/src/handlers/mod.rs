//! HTTP handlers for the gateway

pub mod api;
pub mod streaming;

pub use api::{
    add_content_json, add_content_query, content_info, content_progress, list_content,
    remove_content, server_stats, service_index,
};
pub use streaming::stream_file;
