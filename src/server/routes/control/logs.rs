//! Log inspection

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::server::state::AppState;
use crate::utils::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub skill_id: Option<Uuid>,
    #[serde(default = "LogQuery::default_limit")]
    pub limit: usize,
}

impl LogQuery {
    fn default_limit() -> usize {
        50
    }
}

/// `GET /v1/reactive-agents/logs`
pub async fn list_logs(
    state: web::Data<AppState>,
    query: web::Query<LogQuery>,
) -> ActixResult<HttpResponse> {
    let logs = state
        .storage
        .get_logs(query.skill_id, query.limit.min(500))
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(logs))
}

/// `GET /v1/reactive-agents/logs/{log_id}`
pub async fn get_log(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let log = state
        .storage
        .get_log(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(log))
}

/// `GET /v1/reactive-agents/logs/{log_id}/outputs`
pub async fn get_log_outputs(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let outputs = state
        .storage
        .get_log_outputs(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(outputs))
}
