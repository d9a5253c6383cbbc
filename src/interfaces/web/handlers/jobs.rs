use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};

use super::super::AppState;
use crate::core::store::TriggerSource;

/// Actor recorded when a PATCH omits `modifiedBy`.
const API_ACTOR: &str = "api";

pub async fn list_jobs_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.service.get_all_jobs().await {
        Ok(jobs) => Json(serde_json::json!({ "success": true, "jobs": jobs })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}

pub async fn get_job_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.service.get_job(&job_id).await {
        Ok(Some(job)) => Json(serde_json::json!({
            "success": true,
            "job": job,
            "runningExecutionId": state.service.engine().running_execution(&job_id)
        })),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "error": "Cron job not found"
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerJobRequest {
    #[serde(default)]
    user_id: Option<String>,
}

pub async fn trigger_job_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Json<serde_json::Value> {
    // Body is optional; an empty POST triggers anonymously.
    let payload: TriggerJobRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerJobRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(e) => {
                return Json(serde_json::json!({
                    "success": false,
                    "error": format!("Invalid request body: {e}")
                }));
            }
        }
    };
    let user_id = payload
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let response = state
        .service
        .trigger_job(&job_id, user_id, TriggerSource::Api)
        .await;
    Json(serde_json::to_value(&response).unwrap_or_else(|e| {
        serde_json::json!({ "success": false, "error": e.to_string() })
    }))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    is_enabled: bool,
    #[serde(default)]
    modified_by: Option<String>,
}

pub async fn update_job_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateJobRequest>,
) -> Json<serde_json::Value> {
    let modified_by = payload
        .modified_by
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(API_ACTOR);

    match state
        .service
        .update_job_status(&job_id, payload.is_enabled, modified_by)
        .await
    {
        Ok(Some(job)) => Json(serde_json::json!({ "success": true, "job": job })),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "error": "Cron job not found"
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}
