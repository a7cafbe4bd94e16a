//! Files endpoints

use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use serde_json::Value;

use super::audio::read_multipart;
use super::{extract_config, parse_body};
use crate::core::pipeline::PipelineContext;
use crate::core::types::{CanonicalRequest, FileUploadRequest, ProxyRequest};
use crate::server::routes::into_http_response;
use crate::server::state::AppState;

/// `POST /v1/files`
pub async fn upload_file(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> ActixResult<HttpResponse> {
    let mut fields = read_multipart(payload).await?;
    let mut body = Value::Object(std::mem::take(&mut fields));
    let config = extract_config(&req, &mut body)?;
    let request: FileUploadRequest = parse_body(body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::FileUpload(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}

/// `GET /v1/files`
///
/// Listing is a thin proxy onto the target provider's files surface.
pub async fn list_files(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> ActixResult<HttpResponse> {
    let mut body = Value::Object(serde_json::Map::new());
    let config = extract_config(&req, &mut body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::Proxy(ProxyRequest {
                path: "/files".to_string(),
                method: "GET".to_string(),
                body: None,
            }),
            config,
            PipelineContext::new("GET"),
        )
        .await;
    Ok(into_http_response(output))
}
