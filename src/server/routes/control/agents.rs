//! Agent management

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::types::Agent;
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct CreateAgent {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `GET /v1/reactive-agents/agents`
pub async fn list_agents(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let agents = state
        .storage
        .get_agents()
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(agents))
}

/// `POST /v1/reactive-agents/agents`
pub async fn create_agent(
    state: web::Data<AppState>,
    body: web::Json<CreateAgent>,
) -> ActixResult<HttpResponse> {
    let body = body.into_inner();
    if body.name.trim().is_empty() {
        return Err(GatewayError::invalid_param("name", "agent name is required").into());
    }

    let mut agent = Agent::new(body.name);
    agent.description = body.description;
    agent.metadata = body.metadata;

    let created = state
        .storage
        .create_agent(agent)
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Created().json(created))
}

/// `DELETE /v1/reactive-agents/agents/{agent_id}`
pub async fn delete_agent(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    state
        .storage
        .delete_agent(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::NoContent().finish())
}
