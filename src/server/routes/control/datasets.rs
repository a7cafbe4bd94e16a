//! Dataset listings

use actix_web::{HttpResponse, Result as ActixResult, web};
use uuid::Uuid;

use crate::server::state::AppState;
use crate::utils::error::GatewayError;

/// `GET /v1/reactive-agents/datasets`
pub async fn list_datasets(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let datasets = state
        .storage
        .get_datasets()
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(datasets))
}

/// `GET /v1/reactive-agents/datasets/{dataset_id}/logs`
pub async fn get_dataset_logs(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let logs = state
        .storage
        .get_dataset_logs(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(logs))
}
