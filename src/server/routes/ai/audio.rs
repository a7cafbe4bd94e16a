//! Audio endpoints: speech, transcriptions, translations
//!
//! Speech is JSON in, audio bytes out. Transcriptions and translations
//! accept multipart form data; the file part is carried through the
//! canonical body as base64 and re-rendered as multipart upstream.

use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tracing::error;

use super::{extract_config, parse_body};
use crate::core::pipeline::{PipelineContext, PipelineOutput};
use crate::core::types::{
    CanonicalRequest, SpeechRequest, TranscriptionRequest, TranslationRequest,
};
use crate::server::routes::into_http_response;
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

/// `POST /v1/audio/speech`
///
/// The passthrough body carries base64 audio; it is decoded back into
/// the binary response the OpenAI surface promises.
pub async fn speech(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> ActixResult<HttpResponse> {
    let mut body = body.into_inner();
    let config = extract_config(&req, &mut body)?;
    let request: SpeechRequest = parse_body(body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::Speech(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    if let PipelineOutput::Json { status: 200, body } = &output {
        if let Some(encoded) = body.get("audio_b64").and_then(Value::as_str) {
            let content_type = body
                .get("content_type")
                .and_then(Value::as_str)
                .unwrap_or("audio/mpeg")
                .to_string();
            let bytes = BASE64.decode(encoded).map_err(|e| {
                GatewayError::Internal(format!("cached audio payload corrupt: {e}"))
            })?;
            return Ok(HttpResponse::Ok().content_type(content_type).body(bytes));
        }
    }

    Ok(into_http_response(output))
}

/// `POST /v1/audio/transcriptions`
pub async fn transcriptions(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> ActixResult<HttpResponse> {
    let mut fields = read_multipart(payload).await?;
    let mut body = Value::Object(std::mem::take(&mut fields));
    let config = extract_config(&req, &mut body)?;
    let request: TranscriptionRequest = parse_body(body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::Transcription(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}

/// `POST /v1/audio/translations`
pub async fn translations(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> ActixResult<HttpResponse> {
    let mut fields = read_multipart(payload).await?;
    let mut body = Value::Object(std::mem::take(&mut fields));
    let config = extract_config(&req, &mut body)?;
    let request: TranslationRequest = parse_body(body)?;

    let output = state
        .pipeline
        .execute(
            CanonicalRequest::Translation(request),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    Ok(into_http_response(output))
}

/// Read a multipart form into a flat JSON object
///
/// The `file` part lands as base64 under `file` with its original name
/// under `filename`; text parts land verbatim.
pub(super) async fn read_multipart(
    mut payload: Multipart,
) -> std::result::Result<Map<String, Value>, GatewayError> {
    let mut fields = Map::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            error!(error = %e, "error reading multipart field");
            GatewayError::bad_request(format!("invalid multipart data: {e}"))
        })?;

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "file" {
            if let Some(cd) = field.content_disposition() {
                if let Some(filename) = cd.get_filename() {
                    fields.insert("filename".into(), json!(filename));
                }
            }
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let bytes = chunk.map_err(|e| {
                    GatewayError::bad_request(format!("error reading file part: {e}"))
                })?;
                data.extend_from_slice(&bytes);
            }
            if data.is_empty() {
                return Err(GatewayError::invalid_param("file", "file part is empty"));
            }
            fields.insert("file".into(), json!(BASE64.encode(&data)));
            fields.entry("filename".to_string()).or_insert(json!("upload.bin"));
        } else {
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let bytes = chunk.map_err(|e| {
                    GatewayError::bad_request(format!("error reading field {name}: {e}"))
                })?;
                data.extend_from_slice(&bytes);
            }
            let text = String::from_utf8_lossy(&data).to_string();
            // Config may ride along as a multipart field
            if name == "idk_config" {
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    GatewayError::bad_request(format!("invalid idk_config field: {e}"))
                })?;
                fields.insert(name, value);
            } else {
                fields.insert(name, json!(text));
            }
        }
    }

    Ok(fields)
}
