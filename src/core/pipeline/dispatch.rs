//! Upstream HTTP dispatch
//!
//! Builds the upstream request from a dialect's URL, headers, and
//! transformed body, sends it with the request deadline, and exposes the
//! response either buffered or as a de-framed frame stream. Audio and
//! file functions render as multipart; speech responses come back as
//! bytes and are wrapped for the passthrough path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::core::providers::Dialect;
use crate::core::types::{CanonicalRequest, FunctionName, Target};
use crate::utils::error::{GatewayError, Result};

/// De-framed upstream stream: one item per frame
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A buffered upstream answer
pub struct BufferedUpstream {
    pub status: u16,
    pub body: Value,
    pub retry_after: Option<Duration>,
}

/// What the upstream produced
pub enum UpstreamResponse {
    Buffered(BufferedUpstream),
    Stream { status: u16, frames: FrameStream },
}

/// Send one upstream call
///
/// `expect_stream` asks for a streaming read of a 2xx response; error
/// statuses are always buffered so the error body can be classified.
pub async fn dispatch(
    client: &reqwest::Client,
    dialect: &Arc<dyn Dialect>,
    target: &Target,
    request: &CanonicalRequest,
    upstream_body: &Value,
    timeout: Duration,
    expect_stream: bool,
) -> Result<UpstreamResponse> {
    let base = dialect.base_url(target)?;
    let endpoint = dialect.endpoint(request, target)?;
    let url = format!(
        "{}{}",
        base.as_str().trim_end_matches('/'),
        endpoint
    );
    let headers = dialect.headers(target, request.function_name())?;

    // Proxy requests carry their own method; everything else POSTs
    let method = match request {
        CanonicalRequest::Proxy(proxy) => proxy
            .method
            .parse::<reqwest::Method>()
            .unwrap_or(reqwest::Method::POST),
        _ => reqwest::Method::POST,
    };
    let mut builder = client.request(method, &url).timeout(timeout);
    for (name, value) in &headers {
        // Multipart sets its own content type
        if is_multipart(request.function_name()) && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        builder = builder.header(name, value);
    }

    let builder = if is_multipart(request.function_name()) {
        builder.multipart(multipart_form(upstream_body)?)
    } else if matches!(request, CanonicalRequest::Proxy(proxy) if proxy.body.is_none()) {
        builder
    } else {
        builder.json(upstream_body)
    };

    let response = builder.send().await.map_err(map_send_error)?;
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    if !(200..300).contains(&status) {
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "message": text }));
        return Ok(UpstreamResponse::Buffered(BufferedUpstream {
            status,
            body,
            retry_after,
        }));
    }

    if expect_stream {
        let frames = frame_stream(response, dialect.stream_delimiter());
        return Ok(UpstreamResponse::Stream { status, frames });
    }

    let body = if request.function_name() == FunctionName::CreateSpeech {
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = response.bytes().await?;
        json!({
            "content_type": content_type,
            "audio_b64": BASE64.encode(&bytes),
        })
    } else {
        response.json::<Value>().await?
    };

    Ok(UpstreamResponse::Buffered(BufferedUpstream {
        status,
        body,
        retry_after,
    }))
}

fn map_send_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout("upstream call exceeded the request deadline".into())
    } else {
        GatewayError::HttpClient(error)
    }
}

fn is_multipart(function: FunctionName) -> bool {
    matches!(
        function,
        FunctionName::CreateTranscription
            | FunctionName::CreateTranslation
            | FunctionName::UploadFile
    )
}

/// Render a transformed audio/file body as a multipart form
///
/// The `file` field is base64 in the canonical body and decodes into the
/// form part named `file` with the original filename.
fn multipart_form(body: &Value) -> Result<reqwest::multipart::Form> {
    let map = body
        .as_object()
        .ok_or_else(|| GatewayError::Internal("multipart body is not an object".into()))?;

    let encoded = map
        .get("file")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::MissingParameter("file".into()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| GatewayError::invalid_param("file", format!("file is not base64: {e}")))?;
    let filename = map
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or("upload.bin")
        .to_string();

    let mut form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(bytes).file_name(filename));

    for (key, value) in map {
        if key == "file" || key == "filename" {
            continue;
        }
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        form = form.text(key.clone(), text);
    }

    Ok(form)
}

/// Split the upstream byte stream into frames on the dialect delimiter
fn frame_stream(response: reqwest::Response, delimiter: &'static str) -> FrameStream {
    let stream = async_stream::try_stream! {
        let mut buffer = String::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(GatewayError::HttpClient)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(position) = buffer.find(delimiter) {
                let frame = buffer[..position].to_string();
                buffer.drain(..position + delimiter.len());
                if !frame.trim().is_empty() {
                    yield frame;
                }
            }
        }

        let remainder = buffer.trim().to_string();
        if !remainder.is_empty() {
            yield remainder;
        }
    };
    Box::pin(stream)
}
