use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::super::AppState;
use crate::core::store::{ExecutionFilter, parse_timestamp};

const DEFAULT_STATS_DAYS: u32 = 7;

pub async fn list_executions_endpoint(
    State(state): State<AppState>,
    Query(filter): Query<ExecutionFilter>,
) -> Json<serde_json::Value> {
    for bound in [&filter.started_after, &filter.started_before]
        .into_iter()
        .flatten()
    {
        if let Err(e) = parse_timestamp(bound) {
            return Json(serde_json::json!({ "success": false, "error": format!("{e:#}") }));
        }
    }

    match state.service.get_execution_history(&filter).await {
        Ok(page) => Json(serde_json::json!({
            "success": true,
            "executions": page.executions,
            "total": page.total,
            "offset": page.offset,
            "limit": page.limit
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}

pub async fn get_execution_endpoint(
    Path(execution_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.service.get_execution(&execution_id).await {
        Ok(Some(execution)) => Json(serde_json::json!({ "success": true, "execution": execution })),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "error": "Execution not found"
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    older_than_days: u32,
}

pub async fn cleanup_executions_endpoint(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Json<serde_json::Value> {
    match state
        .service
        .cleanup_old_executions(query.older_than_days)
        .await
    {
        Ok(deleted) => Json(serde_json::json!({ "success": true, "deleted": deleted })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}

#[derive(serde::Deserialize)]
pub struct StatsQuery {
    days: Option<u32>,
}

pub async fn stats_endpoint(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<serde_json::Value> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    match state.service.get_stats(days).await {
        Ok(stats) => Json(serde_json::json!({ "success": true, "stats": stats })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    }
}
