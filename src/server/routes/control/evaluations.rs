//! Evaluation methods and batch runs

use actix_web::{HttpResponse, Result as ActixResult, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::core::evaluators::{
    EvaluationParams, average_score, evaluate_log_with_methods, registry,
};
use crate::core::pipeline::PipelineJudge;
use crate::core::types::{EvaluationRun, EvaluationRunStatus};
use crate::server::state::AppState;
use crate::utils::error::GatewayError;

/// `GET /v1/reactive-agents/evaluations/methods`
pub async fn list_methods() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(registry().details()))
}

/// `GET /v1/reactive-agents/evaluations`
pub async fn list_runs(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let runs = state
        .storage
        .get_evaluation_runs()
        .await
        .map_err(GatewayError::from)?;
    Ok(HttpResponse::Ok().json(runs))
}

#[derive(Debug, Deserialize)]
pub struct CreateRun {
    pub method: String,
    pub dataset_id: Uuid,
    #[serde(default)]
    pub skill_id: Option<Uuid>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// `POST /v1/reactive-agents/evaluations`
///
/// Starts a batch evaluation of the dataset's logs; the run record
/// tracks progress and collects results.
pub async fn create_run(
    state: web::Data<AppState>,
    body: web::Json<CreateRun>,
) -> ActixResult<HttpResponse> {
    let body = body.into_inner();
    registry().resolve(&body.method)?;
    let params = EvaluationParams::parse(&body.params)?;

    let logs = state
        .storage
        .get_dataset_logs(body.dataset_id)
        .await
        .map_err(GatewayError::from)?;

    let run = EvaluationRun {
        id: Uuid::new_v4(),
        skill_id: body.skill_id,
        method: body.method.clone(),
        status: EvaluationRunStatus::Running,
        params: body.params,
        results: Vec::new(),
        created_at: Utc::now(),
        completed_at: None,
    };
    let run = state
        .storage
        .create_evaluation_run(run)
        .await
        .map_err(GatewayError::from)?;
    info!(run = %run.id, method = %run.method, logs = logs.len(), "starting evaluation run");

    let response = HttpResponse::Accepted().json(&run);

    let storage = state.storage.clone();
    let pipeline = state.pipeline.clone();
    let methods = vec![body.method];
    tokio::spawn(async move {
        let judge = PipelineJudge {
            pipeline: Arc::clone(&pipeline),
            depth: 1,
        };
        let mut run = run;
        for log in &logs {
            let records = evaluate_log_with_methods(&methods, &params, log, &judge).await;
            run.results.extend(records);
        }
        run.status = EvaluationRunStatus::Completed;
        run.completed_at = Some(Utc::now());
        let summary = average_score(&run.results);
        info!(run = %run.id, avg = ?summary, "evaluation run completed");
        if let Err(e) = storage.update_evaluation_run(run).await {
            error!(error = %e, "failed to persist evaluation run");
        }
    });

    Ok(response)
}
