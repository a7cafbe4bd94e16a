//! Model registry management

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::types::ModelEntry;
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct CreateModel {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `GET /v1/reactive-agents/models`
pub async fn list_models(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let models = state
        .storage
        .get_models()
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(models))
}

/// `POST /v1/reactive-agents/models`
pub async fn create_model(
    state: web::Data<AppState>,
    body: web::Json<CreateModel>,
) -> ActixResult<HttpResponse> {
    let body = body.into_inner();
    // Unknown provider tags fail here, not at request time
    crate::core::providers::registry().resolve(&body.provider)?;

    let model = ModelEntry {
        id: Uuid::new_v4(),
        name: body.name,
        provider: body.provider,
        description: body.description,
    };
    let created = state
        .storage
        .create_model(model)
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Created().json(created))
}
