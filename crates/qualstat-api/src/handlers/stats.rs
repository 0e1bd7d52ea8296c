use axum::{
    extract::{Query, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use qualstat_core::{CancellationToken, DatabaseDescriptor};
use serde::Deserialize;
use std::path::Path;

use crate::{error::ApiError, state::ApiState};

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    /// `clientId:projectId`
    pub project: Option<String>,
    pub database: Option<String>,
}

/// Extract the project id from a `clientId:projectId` selector.
pub fn parse_project_selector(selector: &str) -> Result<i64, ApiError> {
    let invalid = || {
        ApiError::bad_request(format!(
            "Invalid project selector '{}', expected clientId:projectId",
            selector
        ))
    };

    let (client, project) = selector.split_once(':').ok_or_else(invalid)?;
    client.trim().parse::<i64>().map_err(|_| invalid())?;
    let project_id = project.trim().parse::<i64>().map_err(|_| invalid())?;
    if project_id <= 0 {
        return Err(invalid());
    }
    Ok(project_id)
}

/// Quality statistics of a whole project or of a single database file.
pub async fn get_quality_stats(
    State(state): State<ApiState>,
    Query(params): Query<StatsParams>,
) -> Result<Response, ApiError> {
    // Cancelled when the client goes away and axum drops this future.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    if let Some(selector) = params.project.as_deref().filter(|s| !s.is_empty()) {
        let project_id = parse_project_selector(selector)?;
        let stats = state.stats.project_stats(project_id, &cancel).await?;

        let mut response = Json(stats.result).into_response();
        response.headers_mut().insert(
            "x-cache",
            HeaderValue::from_static(if stats.cached { "HIT" } else { "MISS" }),
        );
        return Ok(response);
    }

    let path = params
        .database
        .filter(|s| !s.is_empty())
        .or_else(|| state.config.default_database.clone())
        .ok_or_else(|| ApiError::bad_request("Either 'project' or 'database' must be given"))?;

    let name = Path::new(&path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());
    let descriptor = DatabaseDescriptor::new(0, name, path);

    let record = state
        .stats
        .aggregator()
        .provider()
        .get_stats(&descriptor, &cancel)
        .await?
        .into_record()?;

    Ok(Json(record).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project_selector() {
        assert_eq!(parse_project_selector("3:17").unwrap(), 17);
        assert_eq!(parse_project_selector(" 3 : 17 ").unwrap(), 17);
        assert!(parse_project_selector("17").is_err());
        assert!(parse_project_selector("a:17").is_err());
        assert!(parse_project_selector("3:x").is_err());
        assert!(parse_project_selector("3:0").is_err());
        assert!(parse_project_selector("3:-2").is_err());
    }
}
