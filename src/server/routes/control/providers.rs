//! Provider and credential listings

use actix_web::{HttpResponse, Result as ActixResult, web};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::providers::registry;
use crate::core::types::ProviderApiKey;
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

/// `GET /v1/reactive-agents/providers`
///
/// Lists the dialect registry: tag, credential requirement, native
/// streaming support, and the extra fields each dialect understands.
pub async fn list_providers() -> ActixResult<HttpResponse> {
    let providers: Vec<_> = registry()
        .tags()
        .into_iter()
        .filter_map(|tag| registry().resolve(tag).ok())
        .map(|dialect| {
            json!({
                "tag": dialect.tag(),
                "api_key_required": dialect.api_key_required(),
                "native_streaming": dialect.supports_native_streaming(),
                "custom_fields": dialect.custom_fields_schema(),
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(providers))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKey {
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub custom_host: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// `GET /v1/reactive-agents/providers/keys`
///
/// Secrets are redacted in the listing.
pub async fn list_api_keys(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let keys = state
        .storage
        .get_ai_provider_api_keys()
        .await
        .map_err(GatewayError::from)?;
    let redacted: Vec<_> = keys
        .iter()
        .map(|key| {
            json!({
                "id": key.id,
                "provider": key.provider,
                "custom_host": key.custom_host,
                "label": key.label,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(redacted))
}

/// `POST /v1/reactive-agents/providers/keys`
pub async fn create_api_key(
    state: web::Data<AppState>,
    body: web::Json<CreateApiKey>,
) -> ActixResult<HttpResponse> {
    let body = body.into_inner();
    registry().resolve(&body.provider)?;

    let key = ProviderApiKey {
        id: Uuid::new_v4(),
        provider: body.provider,
        api_key: body.api_key,
        custom_host: body.custom_host,
        label: body.label,
    };
    let created = state
        .storage
        .create_ai_provider_api_key(key)
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Created().json(json!({"id": created.id, "provider": created.provider})))
}
