//! HTTP and WebSocket request handlers
//!
//! - `media_stream` - telephony media-stream WebSocket bound to the bridge

pub mod media_stream;

pub use media_stream::media_stream_handler;
