use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::ApiError, state::ApiState};

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateParams {
    pub project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InvalidateBody {
    project_id: Option<Value>,
}

pub async fn get_cache_stats(State(state): State<ApiState>) -> Json<Value> {
    let stats = state.stats.cache().stats().await;
    Json(json!({
        "enabled": true,
        "stats": stats,
    }))
}

fn parse_project_id(raw: &Value) -> Result<i64, ApiError> {
    let id = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request(format!(
            "Invalid project_id: {}",
            raw
        ))),
    }
}

/// Drop one project's cached aggregate, or everything when no project is given.
///
/// `project_id` is read from the query string first, then from a JSON body.
pub async fn invalidate_cache(
    State(state): State<ApiState>,
    Query(params): Query<InvalidateParams>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let raw = match params.project_id.filter(|s| !s.is_empty()) {
        Some(id) => Some(Value::String(id)),
        None if body.is_empty() => None,
        None => {
            let parsed: InvalidateBody = serde_json::from_slice(&body)
                .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;
            parsed.project_id.filter(|v| !v.is_null())
        }
    };

    let cache = state.stats.cache();
    match raw {
        Some(raw) => {
            let project_id = parse_project_id(&raw)?;
            let removed = cache.invalidate_project(project_id).await;
            tracing::info!("Cache invalidated for project {}", project_id);
            Ok(Json(json!({
                "success": true,
                "project_id": project_id,
                "removed": removed,
                "message": format!("Cache invalidated for project {}", project_id),
            })))
        }
        None => {
            cache.clear().await;
            tracing::info!("Project stats cache cleared");
            Ok(Json(json!({
                "success": true,
                "message": "Cache cleared",
            })))
        }
    }
}
