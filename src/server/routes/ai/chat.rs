//! Chat completions endpoint

use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use serde_json::Value;
use tracing::info;

use super::{extract_config, parse_body};
use crate::core::pipeline::PipelineContext;
use crate::core::types::{CanonicalRequest, ChatCompletionRequest};
use crate::server::routes::into_http_response;
use crate::server::state::AppState;

/// `POST /v1/chat/completions`
///
/// OpenAI-compatible chat completions, streaming and non-streaming.
pub async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> ActixResult<HttpResponse> {
    let mut body = body.into_inner();
    let config = extract_config(&req, &mut body)?;
    let request: ChatCompletionRequest = parse_body(body)?;
    info!(model = %request.model, stream = request.stream.unwrap_or(false), "chat completion request");

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::ChatCompletion(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}
