pub mod media_stream;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::media_stream_admission;
use crate::state::AppState;

/// Assemble the application router.
///
/// Layer order (outer to inner): admission -> handler. The admission
/// middleware needs `ConnectInfo<SocketAddr>`, so serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_app(state: Arc<AppState>) -> Router {
    media_stream::create_media_stream_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            media_stream_admission,
        ))
        .with_state(state)
}
