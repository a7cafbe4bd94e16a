//! Skill management

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::types::Skill;
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct CreateSkill {
    pub name: String,
    #[serde(default)]
    pub optimize: bool,
    #[serde(default)]
    pub configuration_count: Option<u32>,
    #[serde(default)]
    pub system_prompt_count: Option<u32>,
    #[serde(default)]
    pub clustering_interval: Option<u64>,
    #[serde(default)]
    pub exploration_temperature: Option<f64>,
    #[serde(default)]
    pub reflection_min_requests_per_arm: Option<u64>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub evaluation_methods: Vec<String>,
}

impl CreateSkill {
    fn apply(self, mut skill: Skill) -> Skill {
        skill.optimize = self.optimize;
        if let Some(count) = self.configuration_count {
            skill.configuration_count = count;
        }
        if let Some(count) = self.system_prompt_count {
            skill.system_prompt_count = count;
        }
        if let Some(interval) = self.clustering_interval {
            skill.clustering_interval = interval;
        }
        if let Some(temperature) = self.exploration_temperature {
            skill.exploration_temperature = temperature;
        }
        if let Some(min) = self.reflection_min_requests_per_arm {
            skill.reflection_min_requests_per_arm = min;
        }
        skill.models = self.models;
        skill.evaluation_methods = self.evaluation_methods;
        skill
    }
}

/// `GET /v1/reactive-agents/agents/{agent_id}/skills`
pub async fn list_skills(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let skills = state
        .storage
        .get_skills(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(skills))
}

/// `POST /v1/reactive-agents/agents/{agent_id}/skills`
pub async fn create_skill(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CreateSkill>,
) -> ActixResult<HttpResponse> {
    let agent_id = path.into_inner();
    let body = body.into_inner();
    if body.name.trim().is_empty() {
        return Err(GatewayError::invalid_param("name", "skill name is required").into());
    }
    if let Some(temperature) = body.exploration_temperature {
        if temperature <= 0.0 {
            return Err(GatewayError::invalid_param(
                "exploration_temperature",
                "exploration_temperature must be positive",
            )
            .into());
        }
    }
    for method in &body.evaluation_methods {
        crate::core::evaluators::registry().resolve(method)?;
    }

    let name = body.name.clone();
    let skill = body.apply(Skill::new(agent_id, name));
    let created = state
        .storage
        .create_skill(skill)
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Created().json(created))
}

/// `PUT /v1/reactive-agents/skills/{skill_id}`
pub async fn update_skill(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<Skill>,
) -> ActixResult<HttpResponse> {
    let skill_id = path.into_inner();
    let mut skill = body.into_inner();
    skill.id = skill_id;
    let updated = state
        .storage
        .update_skill(skill)
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(updated))
}

/// `DELETE /v1/reactive-agents/skills/{skill_id}`
pub async fn delete_skill(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    state
        .storage
        .delete_skill(path.into_inner())
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::NoContent().finish())
}
