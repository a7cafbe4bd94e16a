//! Liveness endpoint

use actix_web::{HttpResponse, Result as ActixResult};
use serde_json::json;

/// `GET /health`
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
