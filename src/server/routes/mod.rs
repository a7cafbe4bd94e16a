//! HTTP route modules
//!
//! The inference surface lives under `ai/`; the control plane under
//! `control/` is mounted at `/v1/reactive-agents`.

pub mod ai;
pub mod control;
pub mod health;

use actix_web::HttpResponse;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use futures::StreamExt;

use crate::core::pipeline::PipelineOutput;

/// Map a pipeline output onto the HTTP response
pub fn into_http_response(output: PipelineOutput) -> HttpResponse {
    match output {
        PipelineOutput::Json { status, body } => {
            let status = actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).json(body)
        }
        PipelineOutput::Sse(stream) => HttpResponse::Ok()
            .insert_header((CONTENT_TYPE, "text/event-stream"))
            .insert_header((CACHE_CONTROL, "no-cache"))
            .streaming(stream.map(Ok::<_, actix_web::Error>)),
    }
}
