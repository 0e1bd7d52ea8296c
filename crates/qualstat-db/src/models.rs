use chrono::{DateTime, Utc};
use qualstat_core::DatabaseDescriptor;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectDatabaseRecord {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub file_path: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ProjectDatabaseRecord> for DatabaseDescriptor {
    fn from(record: ProjectDatabaseRecord) -> Self {
        DatabaseDescriptor {
            id: record.id,
            project_id: record.project_id,
            name: record.name,
            file_path: record.file_path,
            is_active: record.is_active,
            last_used_at: record.last_used_at,
        }
    }
}

/// One exportable row of the `records` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub code: Option<String>,
    pub source: Option<String>,
    pub quality_score: f64,
    pub quality_level: Option<String>,
    pub is_benchmark: bool,
}

impl RecordRow {
    pub const COLUMNS: [&'static str; 8] = [
        "id",
        "project_id",
        "name",
        "code",
        "source",
        "quality_score",
        "quality_level",
        "is_benchmark",
    ];
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecord {
    pub project_id: i64,
    pub name: String,
    pub code: Option<String>,
    pub source: Option<String>,
    pub quality_score: f64,
    pub quality_level: Option<String>,
    pub is_benchmark: bool,
}
