//! Media stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media stream router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for one telephony call leg
///
/// # Protocol
///
/// The transport sends JSON events tagged by `event`:
/// 1. `connected` (optional) and `start`, whose `customParameters` carry
///    `pairingKey` and `role` (`a`/`b`), or neither for a single-leg call
/// 2. `media` frames with base64 audio, `mark` acknowledgements, `dtmf`
/// 3. `stop` at end of stream
///
/// The bridge answers with `media`, `mark` and `clear` events.
///
/// # Example
///
/// ```json
/// {"event": "start", "start": {"streamSid": "MZ1", "customParameters": {"pairingKey": "c1", "role": "a"}}}
/// {"event": "media", "media": {"payload": "//7+/w=="}, "sequenceNumber": "2"}
/// {"event": "mark", "mark": {"name": "item_abc:12"}}
/// ```
pub fn create_media_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
