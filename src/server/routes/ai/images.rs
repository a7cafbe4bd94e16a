//! Image generations endpoint

use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use serde_json::Value;

use super::{extract_config, parse_body};
use crate::core::pipeline::PipelineContext;
use crate::core::types::{CanonicalRequest, ImageGenerationRequest};
use crate::server::routes::into_http_response;
use crate::server::state::AppState;

/// `POST /v1/images/generations`
pub async fn image_generations(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> ActixResult<HttpResponse> {
    let mut body = body.into_inner();
    let config = extract_config(&req, &mut body)?;
    let request: ImageGenerationRequest = parse_body(body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::ImageGeneration(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}
