use axum::{
    extract::{Path, State},
    Json,
};
use qualstat_core::DatabaseDescriptor;
use serde::Deserialize;

use crate::{error::ApiError, state::ApiState};

#[derive(Debug, Deserialize)]
pub struct UpdateDatabaseRequest {
    pub is_active: bool,
}

/// Activate or deactivate one of a project's databases.
pub async fn update_database(
    State(state): State<ApiState>,
    Path((project_id, database_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateDatabaseRequest>,
) -> Result<Json<DatabaseDescriptor>, ApiError> {
    let descriptor = state
        .stats
        .set_database_active(project_id, database_id, payload.is_active)
        .await?;
    Ok(Json(descriptor))
}
