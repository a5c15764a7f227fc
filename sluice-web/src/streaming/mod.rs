//! HTTP side of byte-range streaming

pub mod range_streamer;

pub use range_streamer::{RangeStreamer, StreamReply};
