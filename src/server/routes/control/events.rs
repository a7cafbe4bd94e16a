//! Operator event stream

use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{HttpResponse, Result as ActixResult, web};
use futures::StreamExt;
use tracing::debug;

use crate::server::state::AppState;

/// `GET /v1/reactive-agents/events`
///
/// SSE feed of log lifecycle events. Slow consumers are disconnected by
/// the broadcaster rather than backpressuring the pipeline.
pub async fn events(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let (subscriber_id, stream) = state.broadcaster.subscribe();
    debug!(subscriber = %subscriber_id, "event stream subscriber connected");

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(stream.map(|event| Ok::<_, actix_web::Error>(event.to_bytes()))))
}
