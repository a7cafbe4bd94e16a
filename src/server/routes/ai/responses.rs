//! Responses API endpoint

use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use serde_json::Value;
use tracing::info;

use super::{extract_config, parse_body};
use crate::core::pipeline::PipelineContext;
use crate::core::types::{CanonicalRequest, ModelResponseRequest};
use crate::server::routes::into_http_response;
use crate::server::state::AppState;

/// `POST /v1/responses`
///
/// Responses API input items are projected into the chat convention and
/// served over each provider's chat surface.
pub async fn responses(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> ActixResult<HttpResponse> {
    let mut body = body.into_inner();
    let config = extract_config(&req, &mut body)?;
    let request: ModelResponseRequest = parse_body(body)?;
    info!(model = %request.model, "model response request");

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::ModelResponse(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}
