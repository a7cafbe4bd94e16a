//! Model listing endpoint

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde_json::json;

use crate::server::state::AppState;

/// `GET /v1/models`
///
/// Lists the models registered with the control plane in the OpenAI
/// listing shape.
pub async fn list_models(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let models = state
        .storage
        .get_models()
        .await
        .map_err(crate::utils::error::GatewayError::from)?;

    let data: Vec<_> = models
        .iter()
        .map(|model| {
            json!({
                "id": model.name,
                "object": "model",
                "owned_by": model.provider,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({"object": "list", "data": data})))
}
